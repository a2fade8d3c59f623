//! Reshaping flat listings into entries and trees.

use crate::Filer;
use crate::error::{ErrorKind, Result};
use crate::models::{Entry, EntryKind, RawEntry};
use futures::future::BoxFuture;
use std::collections::HashSet;

/// Deeper than any real directory tree; only a misbehaving Filer gets here.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Final non-empty segment of a `/`-separated path.
pub fn name_of(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Suffix after the last `.` of a file name, without the dot.
pub fn extension_of(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, extension)| extension).unwrap_or_default()
}

/// Turn a listed entry into an [`Entry`], deciding once whether it is a
/// file or a directory.
///
/// ```
/// use filer_client::listing::annotate;
/// use filer_client::models::RawEntry;
///
/// let raw: RawEntry = serde_json::from_str(r#"{"FullPath": "/docs/report.pdf", "chunks": [{}]}"#).unwrap();
/// let entry = annotate(raw);
/// assert_eq!(entry.name, "report.pdf");
/// assert_eq!(entry.extension(), "pdf");
/// assert!(!entry.is_directory());
/// ```
pub fn annotate(raw: RawEntry) -> Entry {
    let name = name_of(&raw.full_path).to_string();
    let kind = match raw.chunks {
        Some(chunks) if !chunks.is_empty() => {
            let extension = extension_of(&name).to_string();
            EntryKind::File { chunks, extension }
        },
        _ => EntryKind::Directory { children: None },
    };
    Entry {
        path: raw.full_path,
        name,
        kind,
        metadata: raw.metadata,
    }
}

/// Depth-first expansion of a remote tree, one listing per directory.
///
/// The Filer is trusted to return a tree, but a listing that points back at
/// a directory already being expanded, or a tree deeper than `max_depth`,
/// is reported as [`Decode`](crate::error::ErrorKind::Decode) instead of
/// recursing forever.
pub(crate) struct Expansion<'f> {
    filer: &'f Filer,
    max_depth: usize,
    visited: HashSet<String>,
}

impl<'f> Expansion<'f> {
    pub(crate) fn new(filer: &'f Filer, max_depth: usize) -> Self {
        Self { filer, max_depth, visited: HashSet::new() }
    }

    pub(crate) fn expand<'a>(&'a mut self, path: &'a str, depth: usize) -> BoxFuture<'a, Result<Vec<Entry>>> {
        Box::pin(async move {
            if depth > self.max_depth {
                exn::bail!(ErrorKind::Decode(format!("listing of {path} exceeds maximum depth {}", self.max_depth)));
            }
            self.visited.insert(directory_key(path));
            let mut entries = self.filer.list_folder(path).await?;
            for entry in entries.iter_mut() {
                let EntryKind::Directory { children } = &mut entry.kind else {
                    continue;
                };
                if self.visited.contains(&directory_key(&entry.path)) {
                    exn::bail!(ErrorKind::Decode(format!("listing of {path} refers back to {}", entry.path)));
                }
                tracing::trace!(path = %entry.path, depth = depth + 1, "Expanding directory");
                *children = Some(self.expand(&entry.path, depth + 1).await?);
            }
            Ok(entries)
        })
    }
}

fn directory_key(path: &str) -> String {
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}
