//! # docdb
//!
//! Async client core for a globally distributed document database:
//! - Request model for CRUD, query and script operations
//! - Session consistency through tracked session tokens
//! - Regional endpoint discovery and read-region rotation
//! - Stacked retry policies for throttling, write-region failover, stale
//!   session reads and stale partition key definitions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docdb::{ConsistencyLevel, DocumentClient, RequestOptions};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentClient::builder()
//!         .endpoint("https://myaccount.documents.example.com/")
//!         .master_key("c2VjcmV0")
//!         .consistency_level(ConsistencyLevel::Session)
//!         .build()?;
//!
//!     client
//!         .create_document("dbs/app/colls/orders", &json!({"id": "1", "tenant": "acme"}), RequestOptions::default())
//!         .await?;
//!
//!     // reads in the same client see the write
//!     let order: Value = client
//!         .read_document("dbs/app/colls/orders/docs/1", RequestOptions::default().with_partition_key("acme"))
//!         .await?;
//!     println!("{}", order);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Re-export commonly used types
pub use client::{DocumentClient, DocumentClientBuilder, FeedPage, RequestOptions};
pub use config::{ClientConfig, ConsistencyLevel, QueryCompatibilityMode, RetryOptions};
pub use error::{Error, Result, ServiceError, ServiceErrorKind};
pub use executor::RequestExecutor;
pub use gateway::{GatewayTransport, ServiceResponse};
pub use request::{BodyStream, OperationKind, PartitionKey, QuerySpec, ResourceType, ServiceRequest};
pub use session::SessionTokenStore;

// Module declarations
pub mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod observability;
pub mod policy;
pub mod request;
pub mod routing;
pub mod session;

// Re-export key dependencies for convenience
pub use async_trait::async_trait;
pub use docdb_core::retry::{AbortHandle, AbortSignal};
pub use serde_json::Value as JsonValue;

/// Prelude module for common imports
///
/// # Examples
///
/// ```rust
/// use docdb::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AbortHandle, BodyStream, ClientConfig, ConsistencyLevel, DocumentClient, Error, OperationKind,
        PartitionKey, QuerySpec, RequestOptions, ResourceType, Result, ServiceError, ServiceRequest,
        ServiceResponse,
    };
}

/// Crate version, automatically updated from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
