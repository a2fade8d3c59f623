//! Client models.
//!
//! Wire types mirror the JSON the Filer sends back; everything else is what
//! the client hands to callers after reshaping.

use crate::error::Error;
use crate::uri::QueryParams;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Opaque storage reference inside a file entry.
///
/// Only its presence matters to the client: a listing entry without chunks
/// is a directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Chunk(pub Value);

/// Whether an [`Entry`] is a directory or a file, decided once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Directory {
        /// `None` until the directory is expanded by a recursive listing.
        /// `Some(vec![])` means it was expanded and is empty.
        children: Option<Vec<Entry>>,
    },
    File {
        chunks: Vec<Chunk>,
        /// Suffix after the last `.` in the name, without the dot.
        extension: String,
    },
}

/// One node of a remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Full `/`-separated path on the Filer
    pub path: String,
    /// Final segment of [`path`](Self::path)
    pub name: String,
    pub kind: EntryKind,
    /// Every other field the Filer sent, untouched
    pub metadata: Map<String, Value>,
}
impl Entry {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    /// File extension; always empty for directories.
    pub fn extension(&self) -> &str {
        match &self.kind {
            EntryKind::File { extension, .. } => extension,
            EntryKind::Directory { .. } => "",
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        match &self.kind {
            EntryKind::File { chunks, .. } => chunks,
            EntryKind::Directory { .. } => &[],
        }
    }

    /// Children of an expanded directory. `None` for files and for
    /// directories that were never expanded.
    pub fn children(&self) -> Option<&[Entry]> {
        match &self.kind {
            EntryKind::Directory { children } => children.as_deref(),
            EntryKind::File { .. } => None,
        }
    }

    /// Size in bytes as reported by the Filer.
    pub fn size(&self) -> Option<u64> {
        self.field("FileSize").and_then(Value::as_u64)
    }

    pub fn mime(&self) -> Option<&str> {
        self.field("Mime").and_then(Value::as_str).filter(|mime| !mime.is_empty())
    }

    /// Last modification time, when the Filer sent one in RFC 3339 form.
    pub fn modified(&self) -> Option<OffsetDateTime> {
        self.field("Mtime").and_then(Value::as_str).and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
    }

    // Go's encoding/json matches keys case-insensitively, and Filer versions
    // differ on capitalisation.
    fn field(&self, key: &str) -> Option<&Value> {
        self.metadata
            .get(key)
            .or_else(|| self.metadata.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
    }
}

/// Entry exactly as listed by the Filer, before reshaping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(rename = "FullPath", alias = "fullpath", alias = "fullPath")]
    pub full_path: String,
    #[serde(default, alias = "Chunks")]
    pub chunks: Option<Vec<Chunk>>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Directory listing response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResponse {
    #[serde(default, rename = "Path", alias = "path")]
    pub path: Option<String>,
    #[serde(default, rename = "Entries", alias = "entries")]
    pub entries: Option<Vec<RawEntry>>,
}

/// Response to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadResult {
    /// Display name of the stored file
    pub name: String,
    /// Canonical URL of the stored content
    #[serde(rename = "url")]
    pub file_url: String,
    /// File identifier assigned by the blob store
    #[serde(rename = "fid")]
    pub file_id: String,
    pub size: u64,
    /// Server-supplied failure text. Never set on results handed to callers.
    pub error: String,
}

/// Placement options for uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub collection: Option<String>,
    pub ttl: Option<String>,
}
impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        if let Some(collection) = &self.collection {
            params = params.collection(collection);
        }
        if let Some(ttl) = &self.ttl {
            params = params.ttl(ttl);
        }
        params
    }
}

/// A regular file discovered by the local tree walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Base name of the file
    pub name: String,
    /// Absolute path on the local filesystem
    pub path: PathBuf,
    /// Content digest taken at discovery time
    pub checksum: String,
}

/// Outcome of a folder upload.
///
/// When [`error`](Self::error) is set it is authoritative: `completed` then
/// holds the uploads that finished before the failing file, in traversal
/// order, and nothing after it.
#[derive(Debug)]
pub struct FolderUpload {
    pub completed: Vec<UploadResult>,
    pub error: Option<Error>,
}
impl FolderUpload {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<UploadResult>, Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.completed),
        }
    }
}
