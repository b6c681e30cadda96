//! HTTP gateway adapter.
//!
//! [`GatewayTransport`] turns one [`ServiceRequest`] into one HTTP call and the
//! reply into a [`ServiceResponse`] or a typed [`ServiceError`]. It does not
//! retry, sign, or touch session state; the executor owns all of that.

use crate::config::{ClientConfig, ConsistencyLevel, QueryCompatibilityMode};
use crate::constants::{API_VERSION, headers, media_types};
use crate::endpoint::EndpointManager;
use crate::error::{Error, Result, ServiceError};
use crate::request::{OperationKind, RequestBody, ServiceRequest};
use bytes::Bytes;
use docdb_transport::{HttpBody, HttpRequest, ResponseBody, Transport};
use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A successful reply from the service.
#[derive(Debug)]
pub struct ServiceResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl ServiceResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Session token the service reported for this request.
    pub fn session_token(&self) -> Option<&str> {
        self.header_str(headers::SESSION_TOKEN)
    }

    /// Continuation token for the next page of a feed.
    pub fn continuation(&self) -> Option<&str> {
        self.header_str(headers::CONTINUATION)
    }

    /// Request units charged for the operation.
    pub fn request_charge(&self) -> Option<f64> {
        self.header_str(headers::REQUEST_CHARGE)
            .and_then(|v| v.parse().ok())
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.header_str(headers::ACTIVITY_ID)
    }

    /// Buffered body bytes; `None` for streamed responses.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_bytes()
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Parse a buffered body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self
            .body
            .as_bytes()
            .ok_or_else(|| Error::invalid("streamed response must be read with into_json"))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Collect the body (streamed or not) and parse it as JSON.
    pub async fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.body.into_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Settings that shape every gateway call.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub consistency_level: Option<ConsistencyLevel>,
    pub query_mode: QueryCompatibilityMode,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub min_error_status: u16,
}

impl GatewayOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            consistency_level: config.consistency_level,
            query_mode: config.query_compatibility_mode,
            request_timeout: config.request_timeout,
            user_agent: config.user_agent(),
            min_error_status: config.min_error_status,
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Single-shot request execution against the HTTP gateway.
pub struct GatewayTransport {
    transport: Arc<dyn Transport>,
    endpoints: Arc<dyn EndpointManager>,
    options: GatewayOptions,
}

impl GatewayTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Arc<dyn EndpointManager>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            transport,
            endpoints,
            options,
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Endpoint a request will be sent to.
    ///
    /// An explicit override wins; media is always read from the write region;
    /// otherwise reads go to the read endpoint and everything else to the
    /// write endpoint.
    pub fn resolve_endpoint(&self, request: &ServiceRequest) -> Url {
        if let Some(endpoint) = request.endpoint_override() {
            return endpoint.clone();
        }
        if request.is_media() {
            return self.endpoints.write_endpoint();
        }
        self.endpoints.resolve_service_endpoint(request.operation())
    }

    fn url_for(&self, request: &ServiceRequest) -> Result<Url> {
        let mut url = self.resolve_endpoint(request);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::invalid("endpoint cannot carry a resource path"))?;
            segments.pop_if_empty();
            for segment in request.address().path().split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    /// Assemble the HTTP request for one attempt.
    pub fn build_http_request(&self, request: &ServiceRequest) -> Result<HttpRequest> {
        let operation = request.operation();
        let mut http_request = HttpRequest::new(operation.method(), self.url_for(request)?)
            .with_timeout(self.options.request_timeout);

        let defaults = &mut http_request.headers;
        defaults.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        defaults.insert(ACCEPT, HeaderValue::from_static(media_types::JSON));
        defaults.insert(
            HeaderName::from_static(headers::VERSION),
            HeaderValue::from_static(API_VERSION),
        );
        defaults.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.options.user_agent)
                .map_err(|_| Error::Configuration("user agent is not a valid header".into()))?,
        );
        if let Some(level) = self.options.consistency_level {
            defaults.insert(
                HeaderName::from_static(headers::CONSISTENCY_LEVEL),
                HeaderValue::from_static(level.as_str()),
            );
        }
        if operation == OperationKind::Upsert {
            defaults.insert(
                HeaderName::from_static(headers::IS_UPSERT),
                HeaderValue::from_static("True"),
            );
        }

        if operation == OperationKind::Query {
            let content_type = match self.options.query_mode {
                QueryCompatibilityMode::Default | QueryCompatibilityMode::Query => media_types::QUERY_JSON,
                QueryCompatibilityMode::SqlQuery => media_types::SQL,
            };
            http_request.headers.insert(
                HeaderName::from_static(headers::IS_QUERY),
                HeaderValue::from_static("True"),
            );
            http_request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        http_request.body = match request.body() {
            RequestBody::Empty => HttpBody::Empty,
            RequestBody::Bytes(bytes) => HttpBody::Bytes(bytes.clone()),
            RequestBody::Stream(stream) => HttpBody::Stream(stream.open()?),
            RequestBody::Query(spec) => match self.options.query_mode {
                QueryCompatibilityMode::Default | QueryCompatibilityMode::Query => {
                    HttpBody::Bytes(Bytes::from(serde_json::to_vec(spec)?))
                }
                QueryCompatibilityMode::SqlQuery => HttpBody::Bytes(Bytes::from(spec.query.clone())),
            },
        };

        for (name, value) in request.headers() {
            http_request.headers.insert(name.clone(), value.clone());
        }

        if request.wants_streaming_response() {
            http_request = http_request.streaming();
        }
        Ok(http_request)
    }

    /// Send `request` once.
    ///
    /// Statuses at or above the configured threshold become
    /// [`Error::Service`]; wire timeouts become a 408 [`ServiceError`].
    pub async fn execute(&self, request: &ServiceRequest) -> Result<ServiceResponse> {
        let http_request = self.build_http_request(request)?;
        let method = http_request.method.clone();
        let url = http_request.url.clone();

        debug!(
            operation = %request.operation(),
            resource_type = %request.resource_type(),
            method = %method,
            url = %url,
            "sending gateway request"
        );

        let response = self.transport.send_http(http_request).await?;
        let status = response.status;

        if status.as_u16() >= self.options.min_error_status {
            let headers = response.headers;
            let text = response.body.into_text().await?;
            let error = ServiceError::from_response(status, headers, &text);
            debug!(
                status = status.as_u16(),
                sub_status = error.sub_status(),
                url = %url,
                "gateway returned error"
            );
            return Err(error.into());
        }

        debug!(status = status.as_u16(), url = %url, "gateway request succeeded");

        let body = if request.operation() == OperationKind::Delete {
            ResponseBody::empty()
        } else {
            response.body
        };
        Ok(ServiceResponse::new(status, response.headers, body))
    }
}
