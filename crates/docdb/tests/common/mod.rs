//! Common test utilities and helpers

#![allow(dead_code)]

pub mod mock_transport;

use docdb::{ConsistencyLevel, DocumentClient, RetryOptions};
use mock_transport::MockTransport;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

pub const ACCOUNT: &str = "https://acct.example.com/";
pub const COLLECTION: &str = "dbs/app/colls/orders";
pub const COLLECTION_PATH: &str = "/dbs/app/colls/orders";
pub const DOCS_PATH: &str = "/dbs/app/colls/orders/docs";

/// A base64 master key ("secret").
pub fn test_master_key() -> String {
    "c2VjcmV0".to_string()
}

/// Collection resource partitioned on `path`.
pub fn collection_body(path: &str) -> JsonValue {
    json!({
        "id": "orders",
        "_rid": "kL0kAA==",
        "partitionKey": {"paths": [path], "kind": "Hash"}
    })
}

/// Account document listing regional endpoints by host.
pub fn topology_body(writable: &[(&str, &str)], readable: &[(&str, &str)]) -> JsonValue {
    let locations = |entries: &[(&str, &str)]| {
        entries
            .iter()
            .map(|(name, host)| json!({"name": name, "databaseAccountEndpoint": format!("https://{}/", host)}))
            .collect::<Vec<_>>()
    };
    json!({
        "id": "acct",
        "writableLocations": locations(writable),
        "readableLocations": locations(readable),
    })
}

/// Route pipeline logs to the test output when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session-consistent client without endpoint discovery.
pub fn client(transport: &MockTransport, retry: RetryOptions) -> DocumentClient {
    init_logging();
    DocumentClient::builder()
        .endpoint(ACCOUNT)
        .master_key(test_master_key())
        .consistency_level(ConsistencyLevel::Session)
        .endpoint_discovery(false)
        .retry_options(retry)
        .transport(Arc::new(transport.clone()))
        .build()
        .expect("Failed to build client")
}

/// Session-consistent client with endpoint discovery enabled.
pub fn discovering_client(transport: &MockTransport, retry: RetryOptions) -> DocumentClient {
    init_logging();
    DocumentClient::builder()
        .endpoint(ACCOUNT)
        .master_key(test_master_key())
        .consistency_level(ConsistencyLevel::Session)
        .endpoint_discovery(true)
        .retry_options(retry)
        .transport(Arc::new(transport.clone()))
        .build()
        .expect("Failed to build client")
}
