//! Wire-level constants: header names, sub-status codes and media types.

/// Service API version sent with every request.
pub const API_VERSION: &str = "2018-12-31";

/// Header names understood by the gateway.
pub mod headers {
    /// Session token(s) for session consistency
    pub const SESSION_TOKEN: &str = "x-ms-session-token";
    /// Per-request consistency override
    pub const CONSISTENCY_LEVEL: &str = "x-ms-consistency-level";
    /// Service sub-status code on error responses
    pub const SUB_STATUS: &str = "x-ms-substatus";
    /// Throttling delay hint in milliseconds
    pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
    /// Service-assigned activity id
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
    /// API version
    pub const VERSION: &str = "x-ms-version";
    /// Request date used in the signature
    pub const DATE: &str = "x-ms-date";
    /// Partition key of the addressed document, as a JSON array
    pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
    /// Marks a create as an upsert
    pub const IS_UPSERT: &str = "x-ms-documentdb-is-upsert";
    /// Marks a POST as a query
    pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
    /// Continuation token for feeds
    pub const CONTINUATION: &str = "x-ms-continuation";
    /// Page size for feeds
    pub const MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
    /// Allows a query without a partition key to fan out
    pub const ENABLE_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
    /// Request charge reported by the service
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
}

/// Service sub-status codes the retry policies react to.
pub mod sub_status {
    /// With 400: the partition key in the body does not match the collection's definition
    pub const PARTITION_KEY_MISMATCH: u32 = 1001;
    /// With 403: the region no longer accepts writes
    pub const WRITE_FORBIDDEN: u32 = 3;
    /// With 404: the region has not caught up with the session token yet
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;
}

/// Content types used in request bodies.
pub mod media_types {
    /// JSON documents
    pub const JSON: &str = "application/json";
    /// Structured query spec (`{"query": ..., "parameters": [...]}`)
    pub const QUERY_JSON: &str = "application/query+json";
    /// Raw query text
    pub const SQL: &str = "application/sql";
    /// Attachment media
    pub const OCTET_STREAM: &str = "application/octet-stream";
}
