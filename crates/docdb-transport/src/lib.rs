//! HTTP transport layer for the docdb client
//!
//! Provides a trait-based transport abstraction so the gateway adapter can be
//! exercised against a real HTTP stack or an in-memory fake.
//!
//! # Architecture
//!
//! - **Transport trait**: one request in, one response (or transport error) out
//! - **HTTP transport**: `reqwest` client with pooling and per-call timeouts
//! - **Bodies**: buffered bytes or lazy chunk streams in both directions
//! - **Error handling**: failures below the status line as `TransportError`

#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! # Usage
//!
//! ```ignore
//! use docdb_transport::{HttpRequest, HttpTransport, Transport};
//! use http::Method;
//!
//! let transport = HttpTransport::new()?;
//! let request = HttpRequest::new(Method::GET, "https://localhost:8081/".parse()?);
//! let response = transport.send_http(request).await?;
//! ```

pub mod body;
pub mod error;
pub mod http;
pub mod traits;

// Re-export commonly used types
pub use body::{ByteStream, HttpBody, ResponseBody};
pub use error::{Result, TransportError};
pub use self::http::{HttpTransport, HttpTransportConfig};
pub use traits::{HttpRequest, HttpResponse, Transport};
