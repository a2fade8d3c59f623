//! Content fingerprints.
//!
//! The Filer verifies uploads against a `Content-MD5` header, so digests are
//! MD5 encoded as standard (padded) base64: the exact form that header takes.

use crate::error::{ErrorKind, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::ResultExt;
use md5::{Digest, Md5};
use std::path::Path;

/// Digest of an in-memory buffer.
///
/// ```
/// assert_eq!(filer_client::checksum(b"hello"), "XUFAKrxLKna5cZ2REBfFkg==");
/// ```
pub fn checksum(bytes: &[u8]) -> String {
    STANDARD.encode(Md5::digest(bytes))
}

/// Digest of a local file, read fully into memory first.
pub async fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    Ok(checksum(&bytes))
}
