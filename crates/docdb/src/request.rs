//! The request object model.
//!
//! A [`ServiceRequest`] describes one logical operation against one resource:
//! what to do ([`OperationKind`]), to what ([`ResourceType`] plus a path), and
//! with which payload ([`RequestBody`]). Requests are validated when they are
//! built, so a malformed path never reaches the network.
//!
//! # Resource paths
//!
//! Paths alternate type segments and ids: `dbs/{db}/colls/{coll}/docs/{doc}`.
//! A path with an even number of segments addresses a single item; an odd
//! number addresses the feed of items below the parent.
//!
//! ```rust
//! use docdb::request::{OperationKind, ResourceType, ServiceRequest};
//!
//! let request = ServiceRequest::new(
//!     OperationKind::Read,
//!     ResourceType::Document,
//!     "/dbs/shop/colls/orders/docs/o-17",
//! )
//! .unwrap();
//! assert_eq!(request.resource_id(), "o-17");
//! assert_eq!(request.collection_link(), Some("dbs/shop/colls/orders"));
//! ```

use crate::config::ConsistencyLevel;
use crate::constants::{headers, media_types};
use crate::error::{Error, Result};
use bytes::Bytes;
use docdb_transport::ByteStream;
use futures::Stream;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// What a request does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Read,
    Replace,
    Delete,
    Upsert,
    Query,
    ReadFeed,
    ExecuteJavaScript,
}

impl OperationKind {
    /// HTTP method the gateway expects for this operation.
    pub fn method(self) -> Method {
        match self {
            Self::Create | Self::Upsert | Self::ExecuteJavaScript | Self::Query => Method::POST,
            Self::Read | Self::ReadFeed => Method::GET,
            Self::Replace => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }

    /// Reads are routed to the read endpoint; everything else to the write endpoint.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::ReadFeed | Self::Query)
    }

    /// Operations whose body carries the partition key of the target document.
    pub fn writes_document_body(self) -> bool {
        matches!(self, Self::Create | Self::Upsert | Self::Replace)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
            Self::Query => "query",
            Self::ReadFeed => "read_feed",
            Self::ExecuteJavaScript => "execute_javascript",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of resource a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Database,
    Collection,
    Document,
    StoredProcedure,
    Trigger,
    UserDefinedFunction,
    Attachment,
    Media,
    PartitionKeyRange,
    DatabaseAccount,
}

impl ResourceType {
    /// Path segment that introduces this resource type (`docs`, `colls`, ...).
    ///
    /// This is also the resource type string that goes into request signatures.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Database => "dbs",
            Self::Collection => "colls",
            Self::Document => "docs",
            Self::StoredProcedure => "sprocs",
            Self::Trigger => "triggers",
            Self::UserDefinedFunction => "udfs",
            Self::Attachment => "attachments",
            Self::Media => "media",
            Self::PartitionKeyRange => "pkranges",
            Self::DatabaseAccount => "",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatabaseAccount => f.write_str("databaseaccount"),
            other => f.write_str(other.path_segment()),
        }
    }
}

/// A validated resource path with its derived id and link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    path: String,
    id: String,
    link: String,
    collection: Option<String>,
}

impl ResourceAddress {
    /// Parse and validate `path` for `resource_type`.
    pub fn parse(resource_type: ResourceType, path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(Error::invalid("resource path must not be empty"));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if resource_type == ResourceType::DatabaseAccount {
            if !segments.is_empty() {
                return Err(Error::invalid(format!(
                    "database account is addressed by '/', got '{}'",
                    path
                )));
            }
            return Ok(Self {
                path: String::new(),
                id: String::new(),
                link: String::new(),
                collection: None,
            });
        }

        if segments.is_empty() {
            return Err(Error::invalid(format!("invalid resource path '{}'", path)));
        }

        let len = segments.len();
        let is_item = len % 2 == 0;
        let type_segment = if is_item {
            segments[len - 2]
        } else {
            segments[len - 1]
        };

        if type_segment != resource_type.path_segment() {
            return Err(Error::invalid(format!(
                "path '{}' does not address a {} resource",
                path, resource_type
            )));
        }

        let (id, link) = if is_item {
            (segments[len - 1].to_string(), segments.join("/"))
        } else {
            let parent = &segments[..len - 1];
            (
                parent.last().map(|s| s.to_string()).unwrap_or_default(),
                parent.join("/"),
            )
        };

        let collection = (len >= 4 && segments[0] == "dbs" && segments[2] == "colls")
            .then(|| format!("dbs/{}/colls/{}", segments[1], segments[3]));

        Ok(Self {
            path: segments.join("/"),
            id,
            link,
            collection,
        })
    }

    /// Normalized path without leading or trailing slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Id of the addressed item, or of the feed's parent.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resource link used for signing: the item path, or the feed's parent path.
    pub fn link(&self) -> &str {
        &self.link
    }

    /// `dbs/{db}/colls/{coll}` when the path lies inside a collection.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }
}

/// Partition key value of a document, sent as a JSON array header.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionKey(Vec<serde_json::Value>);

impl PartitionKey {
    /// A single-component partition key.
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(vec![value.into()])
    }

    /// The key of documents that lack the partition key property.
    pub fn undefined() -> Self {
        Self(vec![serde_json::Value::Object(Default::default())])
    }

    /// Header representation, e.g. `["tenant-1"]`.
    pub fn to_header_value(&self) -> Result<HeaderValue> {
        let text = serde_json::to_string(&self.0)?;
        HeaderValue::from_str(&text)
            .map_err(|_| Error::invalid(format!("partition key {} is not a valid header", text)))
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<serde_json::Value> for PartitionKey {
    fn from(value: serde_json::Value) -> Self {
        Self(vec![value])
    }
}

/// A parameterized query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub query: String,
    pub parameters: Vec<QueryParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl QuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind `@name` to `value`.
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.push(QueryParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

impl From<&str> for QuerySpec {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

type StreamFactory = dyn Fn() -> ByteStream + Send + Sync;

/// A lazily produced request body.
///
/// A stream built with [`BodyStream::replayable`] is reopened for every
/// attempt. One built with [`BodyStream::once`] can be sent exactly once, so
/// requests carrying it are never retried.
#[derive(Clone)]
pub struct BodyStream {
    source: StreamSource,
}

#[derive(Clone)]
enum StreamSource {
    Replayable(Arc<StreamFactory>),
    Once(Arc<Mutex<Option<ByteStream>>>),
}

impl BodyStream {
    /// A body that can be produced again for every attempt.
    pub fn replayable<F>(factory: F) -> Self
    where
        F: Fn() -> ByteStream + Send + Sync + 'static,
    {
        Self {
            source: StreamSource::Replayable(Arc::new(factory)),
        }
    }

    /// A body that can be sent only once.
    pub fn once<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            source: StreamSource::Once(Arc::new(Mutex::new(Some(Box::pin(stream))))),
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self.source, StreamSource::Replayable(_))
    }

    /// Open the stream for one attempt.
    pub(crate) fn open(&self) -> Result<ByteStream> {
        match &self.source {
            StreamSource::Replayable(factory) => Ok(factory()),
            StreamSource::Once(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| Error::invalid("single-use body stream was already consumed")),
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            StreamSource::Replayable(_) => f.write_str("BodyStream::Replayable(..)"),
            StreamSource::Once(_) => f.write_str("BodyStream::Once(..)"),
        }
    }
}

/// Payload of a request. The variants are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(BodyStream),
    Query(QuerySpec),
}

impl RequestBody {
    /// Whether the body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        match self {
            Self::Stream(stream) => stream.is_replayable(),
            _ => true,
        }
    }
}

/// One logical operation against one resource.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    operation: OperationKind,
    resource_type: ResourceType,
    address: ResourceAddress,
    headers: HeaderMap,
    body: RequestBody,
    endpoint_override: Option<Url>,
    partition_key: Option<PartitionKey>,
    stream_response: bool,
}

impl ServiceRequest {
    /// A request without a body.
    pub fn new(operation: OperationKind, resource_type: ResourceType, path: &str) -> Result<Self> {
        Ok(Self {
            operation,
            resource_type,
            address: ResourceAddress::parse(resource_type, path)?,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            endpoint_override: None,
            partition_key: None,
            stream_response: false,
        })
    }

    /// A request with a pre-encoded body.
    pub fn with_bytes(
        operation: OperationKind,
        resource_type: ResourceType,
        path: &str,
        body: impl Into<Bytes>,
    ) -> Result<Self> {
        let mut request = Self::new(operation, resource_type, path)?;
        request.body = RequestBody::Bytes(body.into());
        request.set_default_content_type(resource_type);
        Ok(request)
    }

    /// A request whose body is `resource` encoded as JSON.
    ///
    /// The resource is serialized immediately; retries resend the same bytes.
    pub fn with_resource<T: Serialize + ?Sized>(
        operation: OperationKind,
        resource_type: ResourceType,
        path: &str,
        resource: &T,
    ) -> Result<Self> {
        let encoded = serde_json::to_vec(resource)?;
        let mut request = Self::new(operation, resource_type, path)?;
        request.body = RequestBody::Bytes(Bytes::from(encoded));
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(media_types::JSON),
        );
        Ok(request)
    }

    /// A query against the feed at `path`.
    pub fn with_query(
        resource_type: ResourceType,
        path: &str,
        query: impl Into<QuerySpec>,
    ) -> Result<Self> {
        let mut request = Self::new(OperationKind::Query, resource_type, path)?;
        request.body = RequestBody::Query(query.into());
        Ok(request)
    }

    /// A request whose body is produced lazily.
    pub fn with_stream(
        operation: OperationKind,
        resource_type: ResourceType,
        path: &str,
        body: BodyStream,
    ) -> Result<Self> {
        let mut request = Self::new(operation, resource_type, path)?;
        request.body = RequestBody::Stream(body);
        request.set_default_content_type(resource_type);
        Ok(request)
    }

    /// Merge caller-supplied headers; they win over anything already set.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set a single header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Override the consistency level for this request only.
    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.headers.insert(
            headers::CONSISTENCY_LEVEL,
            HeaderValue::from_static(level.as_str()),
        );
        self
    }

    /// Pin the partition key instead of deriving it from the body.
    pub fn with_partition_key(mut self, key: impl Into<PartitionKey>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Send this request to `endpoint` regardless of routing.
    pub fn with_endpoint_override(mut self, endpoint: Url) -> Self {
        self.endpoint_override = Some(endpoint);
        self
    }

    /// Hand the response body back as a stream instead of buffering it.
    pub fn streaming_response(mut self) -> Self {
        self.stream_response = true;
        self
    }

    fn set_default_content_type(&mut self, resource_type: ResourceType) {
        // queries get theirs from the gateway's query mode
        if self.operation == OperationKind::Query {
            return;
        }
        let media_type = if resource_type == ResourceType::Media {
            media_types::OCTET_STREAM
        } else {
            media_types::JSON
        };
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(media_type));
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    /// Id of the addressed item, or of the feed's parent.
    pub fn resource_id(&self) -> &str {
        self.address.id()
    }

    /// `dbs/{db}/colls/{coll}` for requests inside a collection.
    pub fn collection_link(&self) -> Option<&str> {
        self.address.collection()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Value of a header, if it is set and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn endpoint_override(&self) -> Option<&Url> {
        self.endpoint_override.as_ref()
    }

    /// Attachment media is served from the write region only.
    pub fn is_media(&self) -> bool {
        self.resource_type == ResourceType::Media
    }

    pub fn partition_key(&self) -> Option<&PartitionKey> {
        self.partition_key.as_ref()
    }

    /// Whether the caller pinned the partition key.
    pub fn is_partition_key_pinned(&self) -> bool {
        self.partition_key.is_some()
    }

    pub fn wants_streaming_response(&self) -> bool {
        self.stream_response
    }

    /// Whether the request is a delete of a whole collection.
    pub fn is_collection_delete(&self) -> bool {
        self.operation == OperationKind::Delete && self.resource_type == ResourceType::Collection
    }
}
