pub mod checksum;
mod client;
pub mod error;
pub mod listing;
pub mod models;
mod path;
pub mod transport;
mod uri;
mod walk;

pub use crate::checksum::{checksum, checksum_file};
pub use crate::client::Filer;
pub use crate::models::{Entry, EntryKind, FolderUpload, LocalFile, UploadOptions, UploadResult};
pub use crate::path::normalize as normalize_remote;
#[cfg(any(test, feature = "mock"))]
pub use crate::transport::MockTransport;
pub use crate::transport::{HttpTransport, Response, Transport};
pub use crate::uri::{QueryParams, build_request_uri, parse_endpoint};
pub use crate::walk::{walk, walk_stream};
use std::sync::Arc;

pub type TransportHandle = Arc<dyn Transport>;
