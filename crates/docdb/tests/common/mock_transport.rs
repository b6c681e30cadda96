//! Scripted transport for exercising the request pipeline without a network
//!
//! Replies are scripted per method and path. Each route hands out its replies
//! in FIFO order and keeps repeating the last one once the script runs out.
//! Every request is captured for assertion.

use bytes::Bytes;
use docdb_transport::{HttpBody, HttpRequest, HttpResponse, ResponseBody, Transport, TransportError};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// A request as it reached the transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Timeout(Duration),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self::Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, body: JsonValue) -> Self {
        Self::status(status).with_body(body.to_string())
    }

    /// An error reply in the service's `{"code", "message"}` shape.
    pub fn error(status: u16, sub_status: Option<u32>, message: &str) -> Self {
        let reply = Self::json(status, serde_json::json!({"code": "Error", "message": message}));
        match sub_status {
            Some(sub_status) => reply.with_header("x-ms-substatus", &sub_status.to_string()),
            None => reply,
        }
    }

    pub fn throttled(retry_after: Duration) -> Self {
        Self::error(429, None, "Request rate is large")
            .with_header("x-ms-retry-after-ms", &retry_after.as_millis().to_string())
    }

    pub fn timeout() -> Self {
        Self::Timeout(Duration::from_secs(60))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self
    }

    pub fn with_session_token(self, token: &str) -> Self {
        self.with_header("x-ms-session-token", token)
    }

    fn with_body(mut self, text: String) -> Self {
        if let Self::Response { body, .. } = &mut self {
            *body = Bytes::from(text);
        }
        self
    }
}

struct Route {
    method: Method,
    path: String,
    replies: VecDeque<MockReply>,
    last: Option<MockReply>,
}

/// Transport that answers from a script.
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    sent: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the replies for `method` on `path` (e.g. `/dbs/d/colls/c/docs`).
    pub async fn on(&self, method: Method, path: &str, replies: Vec<MockReply>) {
        self.routes.lock().await.push(Route {
            method,
            path: path.to_string(),
            replies: replies.into(),
            last: None,
        });
    }

    /// Every request sent so far.
    pub async fn sent(&self) -> Vec<RecordedRequest> {
        self.sent.lock().await.clone()
    }

    /// Requests sent with `method` to `path`.
    pub async fn sent_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .cloned()
            .collect()
    }

    async fn next_reply(&self, method: &Method, path: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock().await;
        let route = routes
            .iter_mut()
            .find(|route| &route.method == method && route.path == path)?;
        match route.replies.pop_front() {
            Some(reply) => {
                route.last = Some(reply.clone());
                Some(reply)
            }
            None => route.last.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let body = match request.body {
            HttpBody::Empty => Bytes::new(),
            HttpBody::Bytes(bytes) => bytes,
            HttpBody::Stream(mut stream) => {
                let mut collected = Vec::new();
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk.map_err(TransportError::Io)?);
                }
                Bytes::from(collected)
            }
        };

        let reply = self.next_reply(&request.method, request.url.path()).await;
        self.sent.lock().await.push(RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        });

        match reply {
            Some(MockReply::Response {
                status,
                headers,
                body,
            }) => Ok(HttpResponse {
                status,
                headers,
                body: ResponseBody::Buffered(body),
            }),
            Some(MockReply::Timeout(after)) => Err(TransportError::Timeout(after)),
            None => Ok(HttpResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: ResponseBody::Buffered(Bytes::from_static(br#"{"code":"NotFound","message":"unscripted"}"#)),
            }),
        }
    }
}
