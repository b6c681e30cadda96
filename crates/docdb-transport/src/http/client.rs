//! HTTP transport client implementation
//!
//! Implements the [`Transport`] trait on top of `reqwest`. One call, one wire
//! round trip: retries live in the client crate's retry driver.

use crate::body::{HttpBody, ResponseBody};
use crate::error::{Result, TransportError};
use crate::traits::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use std::sync::Arc;
use std::time::Duration;

/// `reqwest`-backed transport with connection pooling and per-call timeouts.
#[derive(Clone)]
pub struct HttpTransport {
    client: Arc<ReqwestClient>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(Default::default())
    }

    /// Create a new HTTP transport with custom configuration
    pub fn with_config(config: HttpTransportConfig) -> Result<Self> {
        let mut builder = ReqwestClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            timeout: config.timeout,
        })
    }

    /// Default timeout applied when a request does not carry its own.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut req = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers)
            .timeout(timeout);

        req = match request.body {
            HttpBody::Empty => req,
            HttpBody::Bytes(bytes) => req.body(bytes),
            HttpBody::Stream(stream) => req.body(reqwest::Body::wrap_stream(stream)),
        };

        tracing::trace!(method = %request.method, url = %request.url, "dispatching");

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = if request.stream_response {
            ResponseBody::Streaming(Box::pin(
                response
                    .bytes_stream()
                    .map(move |chunk| chunk.map_err(|e| TransportError::from_reqwest(e, timeout))),
            ))
        } else {
            ResponseBody::Buffered(
                response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::from_reqwest(e, timeout))?,
            )
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// HTTP transport configuration
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Request timeout
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,

    /// User agent sent with every request
    pub user_agent: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 10,
            user_agent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_creation() {
        let transport = HttpTransport::new().expect("Failed to create transport");
        assert_eq!(transport.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_http_transport_with_config() {
        let config = HttpTransportConfig {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 5,
            user_agent: Some("docdb-test/1.0".into()),
        };

        let transport = HttpTransport::with_config(config).expect("Failed to create transport");
        assert_eq!(transport.timeout, Duration::from_secs(30));
    }
}
