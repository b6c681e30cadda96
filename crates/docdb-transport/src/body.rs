//! Request and response bodies.
//!
//! Bodies are either fully buffered or a lazy, finite sequence of byte chunks.
//! Streams are consumed exactly once; replaying an upload is the caller's job.

use crate::error::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

/// A lazily produced, finite sequence of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Body attached to an outgoing request.
#[derive(Default)]
pub enum HttpBody {
    /// No body
    #[default]
    Empty,
    /// Fully buffered payload
    Bytes(Bytes),
    /// Chunked upload
    Stream(ByteStream),
}

impl HttpBody {
    /// Size of the body if it is known up front.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }

    /// Returns `true` for [`HttpBody::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for HttpBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for HttpBody {
    fn from(body: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(body))
    }
}

impl From<Bytes> for HttpBody {
    fn from(body: Bytes) -> Self {
        Self::Bytes(body)
    }
}

/// Body of a received response.
pub enum ResponseBody {
    /// Read to the end before the response was returned
    Buffered(Bytes),
    /// Still on the wire; chunks arrive as the stream is polled
    Streaming(Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>),
}

impl ResponseBody {
    /// An empty buffered body.
    pub fn empty() -> Self {
        Self::Buffered(Bytes::new())
    }

    /// Borrow the bytes of a buffered body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            Self::Streaming(_) => None,
        }
    }

    /// Collect the body, draining the stream if necessary.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Buffered(bytes) => Ok(bytes),
            Self::Streaming(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// Collect the body and decode it as UTF-8, replacing invalid sequences.
    pub async fn into_text(self) -> Result<String> {
        let bytes = self.into_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Collect the body and parse it as JSON.
    pub async fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let bytes = self.into_bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_streaming_body_is_collected() {
        let chunks: Vec<Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"{\"id\":")), Ok(Bytes::from_static(b"\"a\"}"))];
        let body = ResponseBody::Streaming(Box::pin(stream::iter(chunks)));

        let value: serde_json::Value = body.into_json().await.unwrap();
        assert_eq!(value["id"], "a");
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TransportError::Connection("reset".into())),
        ];
        let body = ResponseBody::Streaming(Box::pin(stream::iter(chunks)));
        assert!(matches!(
            body.into_bytes().await,
            Err(TransportError::Connection(_))
        ));
    }

    #[test]
    fn test_known_len() {
        assert_eq!(HttpBody::Empty.known_len(), Some(0));
        assert_eq!(HttpBody::from(vec![1, 2, 3]).known_len(), Some(3));
        let streamed = HttpBody::Stream(Box::pin(futures::stream::empty::<std::io::Result<Bytes>>()));
        assert_eq!(streamed.known_len(), None);
    }
}
