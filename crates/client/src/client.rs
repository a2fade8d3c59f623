//! The Filer client.

use crate::TransportHandle;
use crate::checksum::checksum;
use crate::error::{ErrorKind, Result};
use crate::listing::{DEFAULT_MAX_DEPTH, Expansion, annotate, name_of};
use crate::models::{Entry, FolderUpload, ListResponse, UploadOptions, UploadResult};
use crate::path::{join, normalize};
use crate::transport::{ByteStream, Payload, Response, Upload};
use crate::uri::{QueryParams, build_request_uri, parse_endpoint};
use crate::walk::walk;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::Url;
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};

const ACCEPT_JSON: (&str, &str) = ("Accept", "application/json");
/// Stands in for an empty file; the Filer treats an empty multipart body as
/// a malformed upload.
const EMPTY_FILE_SENTINEL: &[u8] = &[0];

/// Client for a remote Filer.
///
/// Holds nothing but the parsed endpoint, the transport, and two settings,
/// so every operation is independent and can be retried by the caller. The
/// client never retries on its own; see
/// [`ErrorKind::is_retryable`](crate::error::ErrorKind::is_retryable).
///
/// # Examples
///
/// ```no_run
/// use filer_client::{Filer, HttpTransport, UploadOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> filer_client::error::Result<()> {
/// let filer = Filer::new("http://localhost:8888", Arc::new(HttpTransport::new()?))?.with_concurrency(4);
/// let options = UploadOptions::new().collection("backups").ttl("7d");
/// let outcome = filer.upload_folder("./site", "/backups/site", &options).await;
/// println!("{} files uploaded", outcome.completed.len());
/// outcome.into_result()?;
///
/// for entry in filer.list_folder_recursive("/backups").await? {
///     println!("{}", entry.path);
/// }
/// filer.delete_folder("/backups/site").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Filer {
    base: Url,
    transport: TransportHandle,
    concurrency: usize,
    max_depth: usize,
}

impl Debug for Filer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Filer")
            .field("base", &self.base.as_str())
            .field("concurrency", &self.concurrency)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl Filer {
    /// Create a client for the Filer at `endpoint`.
    ///
    /// The endpoint may omit its scheme (`localhost:8888`); any path it
    /// carries is ignored, any query it carries is sent with every request.
    pub fn new(endpoint: &str, transport: TransportHandle) -> Result<Self> {
        let base = parse_endpoint(endpoint)?;
        tracing::debug!(endpoint = %base, "Filer client created");
        Ok(Self { base, transport, concurrency: 1, max_depth: DEFAULT_MAX_DEPTH })
    }

    /// Number of files [`upload_folder`](Self::upload_folder) uploads at
    /// once. Values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Deepest directory level [`list_folder_recursive`](Self::list_folder_recursive)
    /// will expand.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn uri(&self, path: &str, params: &QueryParams) -> String {
        build_request_uri(&self.base, path, params)
    }

    /// Upload one local file to `remote_path`.
    ///
    /// A `remote_path` ending in `/` stores the file inside that directory
    /// under its local name. Empty files are stored as a single `0x00` byte.
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult> {
        self.upload_local(local_path.as_ref(), remote_path, options, None).await
    }

    /// Upload whatever `reader` produces to `remote_path`, streaming it
    /// rather than buffering.
    ///
    /// No checksum is sent since the content is not known up front. Empty
    /// content is uploaded as the empty file sentinel: a `size_hint` of
    /// `Some(0)` skips reading entirely, and without a hint the first chunk
    /// is read ahead to find out. The remote name is the last segment of `remote_path`, which
    /// therefore must not end in `/`.
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        size_hint: Option<u64>,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult>
    where
        R: AsyncRead + Send + 'static,
    {
        let path = normalize(remote_path)?;
        if path.ends_with('/') {
            exn::bail!(ErrorKind::InvalidPath(format!("{remote_path} names a directory, not a file")));
        }
        let sentinel = || Payload::Bytes(Bytes::from_static(EMPTY_FILE_SENTINEL));
        let payload = match size_hint {
            Some(0) => sentinel(),
            Some(length) => Payload::Stream { stream: Box::pin(ReaderStream::new(reader)), length: Some(length) },
            None => {
                let mut body: ByteStream = Box::pin(ReaderStream::new(reader));
                match body.next().await {
                    None => sentinel(),
                    Some(first) => {
                        let stream: ByteStream = Box::pin(stream::iter([first]).chain(body));
                        Payload::Stream { stream, length: None }
                    },
                }
            },
        };
        let upload = Upload { file_name: name_of(&path).to_string(), checksum: None, payload };
        self.send_upload(&path, options, upload).await
    }

    /// Upload every regular file beneath `local_dir` to the same relative
    /// location under `remote_prefix`.
    ///
    /// Files go up in traversal order (see [`walk_stream`](crate::walk_stream)).
    /// The first failure stops the upload; files already stored stay
    /// stored. With a concurrency above 1, later files may already be in
    /// flight when an earlier one fails, but only the uploads before the
    /// failing file are reported.
    pub async fn upload_folder(&self, local_dir: impl AsRef<Path>, remote_prefix: &str, options: &UploadOptions) -> FolderUpload {
        let local_dir = local_dir.as_ref();
        let prepared = async {
            let root = std::path::absolute(local_dir).or_raise(|| ErrorKind::Io(local_dir.to_path_buf()))?;
            let files = walk(&root).await?;
            Ok::<_, crate::error::Error>((root, files))
        };
        let (root, files) = match prepared.await {
            Ok(prepared) => prepared,
            Err(error) => return FolderUpload { completed: Vec::new(), error: Some(error) },
        };
        tracing::info!(local = %local_dir.display(), remote = remote_prefix, files = files.len(), "Uploading folder");

        let root = root.as_path();
        let mut uploads = stream::iter(files)
            .map(move |file| async move {
                // A root that is itself a file maps onto its own name.
                let relative = match file.path.strip_prefix(root) {
                    Ok(relative) if !relative.as_os_str().is_empty() => relative,
                    _ => Path::new(&file.name),
                };
                let remote = join(remote_prefix, relative)?;
                self.upload_local(&file.path, &remote, options, Some(file.checksum.clone())).await
            })
            .buffered(self.concurrency);

        let mut completed = Vec::new();
        while let Some(result) = uploads.next().await {
            match result {
                Ok(uploaded) => completed.push(uploaded),
                Err(error) => {
                    tracing::warn!(remote = remote_prefix, completed = completed.len(), error = ?error, "Folder upload stopped");
                    return FolderUpload { completed, error: Some(error) };
                },
            }
        }
        tracing::info!(remote = remote_prefix, completed = completed.len(), "Folder upload finished");
        FolderUpload { completed, error: None }
    }

    async fn upload_local(
        &self,
        local_path: &Path,
        remote_path: &str,
        options: &UploadOptions,
        known_checksum: Option<String>,
    ) -> Result<UploadResult> {
        let path = normalize(remote_path)?;
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_raise(|| ErrorKind::InvalidPath(local_path.display().to_string()))?;
        let data = fs::read(local_path).await.or_raise(|| ErrorKind::Io(local_path.to_path_buf()))?;
        let (payload, checksum) = match data.is_empty() {
            true => (Bytes::from_static(EMPTY_FILE_SENTINEL), None),
            false => {
                let checksum = known_checksum.unwrap_or_else(|| checksum(&data));
                (Bytes::from(data), Some(checksum))
            },
        };
        let upload = Upload { file_name, checksum, payload: Payload::Bytes(payload) };
        self.send_upload(&path, options, upload).await
    }

    async fn send_upload(&self, path: &str, options: &UploadOptions, upload: Upload) -> Result<UploadResult> {
        let uri = self.uri(path, &options.params());
        tracing::debug!(%uri, file = %upload.file_name, bytes = ?upload.payload.length(), "Uploading");
        let response = self.transport.upload(&uri, upload).await?;
        upload_result(path, response)
    }

    /// List the immediate entries of a remote directory.
    pub async fn list_folder(&self, remote_path: &str) -> Result<Vec<Entry>> {
        let path = normalize(remote_path)?;
        let uri = self.uri(&path, &QueryParams::new());
        tracing::debug!(%uri, "Listing");
        let response = self.transport.get(&uri, &[ACCEPT_JSON]).await?;
        check_status(&path, &response)?;
        if response.body.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }
        let listing: ListResponse =
            serde_json::from_slice(&response.body).or_raise(|| ErrorKind::Decode(format!("listing of {path}")))?;
        Ok(listing.entries.unwrap_or_default().into_iter().map(annotate).collect())
    }

    /// List a remote directory with every subdirectory expanded.
    ///
    /// One request per directory, strictly one after the other. Any failure
    /// fails the whole listing.
    pub async fn list_folder_recursive(&self, remote_path: &str) -> Result<Vec<Entry>> {
        let path = normalize(remote_path)?;
        tracing::info!(path = %path, max_depth = self.max_depth, "Listing recursively");
        let mut expansion = Expansion::new(self, self.max_depth);
        expansion.expand(&path, 0).await
    }

    /// Raw GET; the response is returned whatever its status.
    pub async fn get(&self, remote_path: &str, params: &QueryParams, headers: &[(&str, &str)]) -> Result<Response> {
        let path = normalize(remote_path)?;
        let uri = self.uri(&path, params);
        tracing::debug!(%uri, "GET");
        self.transport.get(&uri, headers).await
    }

    /// Raw GET asking for JSON.
    pub async fn get_json(&self, remote_path: &str, params: &QueryParams) -> Result<Response> {
        self.get(remote_path, params, &[ACCEPT_JSON]).await
    }

    /// Stream the content at `remote_path` into `sink`.
    ///
    /// The body is handed over unread and dropped once `sink` finishes, so it
    /// is never held past this call. Whatever `sink` returns, error
    /// included, is returned as-is.
    ///
    /// ```no_run
    /// use filer_client::{Filer, QueryParams};
    /// use futures::TryStreamExt;
    ///
    /// # async fn example(filer: &Filer) -> filer_client::error::Result<()> {
    /// let lines = filer
    ///     .download("/logs/today.log", &QueryParams::new(), |body| async move {
    ///         let chunks: Vec<_> = body.try_collect().await.map_err(|e| {
    ///             exn::Exn::from(filer_client::error::ErrorKind::Transport(e.to_string()))
    ///         })?;
    ///         Ok(chunks.iter().map(|c| c.iter().filter(|b| **b == b'\n').count()).sum::<usize>())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn download<T, F, Fut>(&self, remote_path: &str, params: &QueryParams, sink: F) -> Result<T>
    where
        F: FnOnce(ByteStream) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = normalize(remote_path)?;
        let uri = self.uri(&path, params);
        tracing::debug!(%uri, "Downloading");
        let response = self.transport.get_stream(&uri).await?;
        if response.status == 404 {
            exn::bail!(ErrorKind::NotFound(path));
        }
        if response.status >= 400 {
            let chunks: Vec<Bytes> = response.body.try_collect().await.unwrap_or_default();
            let message = error_message(&chunks.concat()).unwrap_or_else(|| format!("status {}", response.status));
            exn::bail!(ErrorKind::RequestFailed { status: response.status, message });
        }
        sink(response.body).await
    }

    /// Download `remote_path` into `writer`, returning the number of bytes
    /// written.
    pub async fn download_to<W>(&self, remote_path: &str, params: &QueryParams, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let path = normalize(remote_path)?;
        let context = path.clone();
        self.download(&path, params, |body| async move {
            let mut reader = StreamReader::new(body);
            let copied = tokio::io::copy(&mut reader, &mut *writer)
                .await
                .or_raise(|| ErrorKind::Transport(format!("download of {context}")))?;
            writer.flush().await.or_raise(|| ErrorKind::Transport(format!("download of {context}")))?;
            tracing::debug!(path = %context, bytes = copied, "Download finished");
            Ok(copied)
        })
        .await
    }

    /// Delete with caller-supplied parameters.
    pub async fn delete(&self, remote_path: &str, params: &QueryParams) -> Result<()> {
        let path = normalize(remote_path)?;
        let uri = self.uri(&path, params);
        tracing::debug!(%uri, "Deleting");
        let response = self.transport.delete(&uri).await?;
        check_status(&path, &response)
    }

    pub async fn delete_file(&self, remote_path: &str) -> Result<()> {
        self.delete(remote_path, &QueryParams::new()).await
    }

    /// Delete a directory and everything beneath it.
    pub async fn delete_folder(&self, remote_path: &str) -> Result<()> {
        self.delete_folder_with(remote_path, &QueryParams::new()).await
    }

    /// Like [`delete_folder`](Self::delete_folder), with extra parameters.
    /// `recursive=true` is always sent, overriding any `recursive` in
    /// `params`.
    pub async fn delete_folder_with(&self, remote_path: &str, params: &QueryParams) -> Result<()> {
        self.delete(remote_path, &params.clone().recursive()).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Best description of a failure: the `error` field of a JSON body, else the
/// body text.
fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(ErrorBody { error }) = serde_json::from_slice(body)
        && !error.is_empty()
    {
        return Some(error);
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn check_status(path: &str, response: &Response) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    if response.status == 404 {
        exn::bail!(ErrorKind::NotFound(path.to_string()));
    }
    if response.status >= 400 {
        let message = error_message(&response.body).unwrap_or_else(|| format!("status {}", response.status));
        exn::bail!(ErrorKind::RequestFailed { status: response.status, message });
    }
    Ok(())
}

fn upload_result(path: &str, response: Response) -> Result<UploadResult> {
    if response.status == 404 {
        exn::bail!(ErrorKind::NotFound(path.to_string()));
    }
    if !response.is_success() {
        let message = error_message(&response.body).unwrap_or_else(|| format!("status {}", response.status));
        exn::bail!(ErrorKind::UploadRejected(message));
    }
    let result: UploadResult =
        serde_json::from_slice(&response.body).or_raise(|| ErrorKind::Decode(format!("upload response for {path}")))?;
    if !result.error.is_empty() {
        exn::bail!(ErrorKind::UploadRejected(result.error));
    }
    Ok(result)
}
