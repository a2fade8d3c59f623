//! Transport trait and implementations.
//!
//! The client never talks HTTP directly: every request goes through a
//! [`Transport`] handed to it at construction. [`HttpTransport`] is the real
//! thing; [`MockTransport`] (behind the `mock` feature) is an in-memory Filer
//! for tests.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::HttpTransport;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockTransport, RecordedRequest};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::pin::Pin;

/// Body of a streamed response or upload.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}
impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}
impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// A response whose body has not been read yet.
pub struct StreamResponse {
    pub status: u16,
    pub body: ByteStream,
}

/// Content of an upload.
pub enum Payload {
    Bytes(Bytes),
    Stream {
        stream: ByteStream,
        /// Exact length when known up front
        length: Option<u64>,
    },
}
impl Payload {
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Stream { length, .. } => *length,
        }
    }
}

/// A multipart file upload.
pub struct Upload {
    /// File name reported in the multipart `file` field
    pub file_name: String,
    /// Sent as `Content-MD5` so the Filer can verify what it stored
    pub checksum: Option<String>,
    pub payload: Payload,
}

/// The requests the client needs from an HTTP stack.
///
/// Implementations report failures to obtain a response at all as
/// [`Transport`](crate::error::ErrorKind::Transport). Any response, whatever
/// its status, is returned as-is: interpreting it is the client's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET and buffer the whole body.
    async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Result<Response>;

    /// GET without reading the body.
    async fn get_stream(&self, uri: &str) -> Result<StreamResponse>;

    /// POST a multipart upload.
    async fn upload(&self, uri: &str, upload: Upload) -> Result<Response>;

    async fn delete(&self, uri: &str) -> Result<Response>;
}
