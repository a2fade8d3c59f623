//! Filer Client Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Underlying causes (I/O, HTTP, JSON)
//! are attached as children with `or_raise` rather than flattened into
//! strings.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file or directory could not be read
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The request never produced a response (connection, TLS, timeout)
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// Remote path does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The Filer refused an upload
    #[display("upload rejected: {_0}")]
    UploadRejected(#[error(not(source))] String),
    /// Any other request answered with an error status
    #[display("request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },
    /// Endpoint given at construction is not a usable base URL
    #[display("malformed endpoint: {_0}")]
    MalformedEndpoint(#[error(not(source))] String),
    /// Response body does not match the wire contract
    #[display("invalid response: {_0}")]
    Decode(#[error(not(source))] String),
    /// Path escapes its root or cannot be represented remotely
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
