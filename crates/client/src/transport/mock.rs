//! In-memory Filer for testing.

use super::{ByteStream, Method, Payload, Response, StreamResponse, Transport, Upload};
use crate::checksum::checksum;
use crate::error::{ErrorKind, Result};
use crate::path::normalize;
use crate::uri::PARAM_RECURSIVE;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use exn::ResultExt;
use futures::TryStreamExt;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

const MODIFIED: &str = "2024-05-01T10:00:00Z";
const MODE_FILE: u32 = 0o660;
const MODE_DIR: u32 = 0x8000_0000 | 0o755;
/// Download bodies are split into chunks this small so that consumers
/// actually see a stream rather than a single buffer.
const DOWNLOAD_CHUNK: usize = 4;

/// One request as seen by the [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    /// Percent-decoded request path
    pub path: String,
    pub query: Vec<(String, String)>,
    /// `Content-MD5` of an upload
    pub checksum: Option<String>,
    /// Body of an upload
    pub body: Option<Bytes>,
}
impl RecordedRequest {
    /// First value of a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
    failures: HashMap<String, (u16, String)>,
    listings: HashMap<String, String>,
    requests: Vec<RecordedRequest>,
    next_fid: u64,
}

/// In-memory stand-in for a Filer server.
///
/// Behaves like the real service for everything the client relies on:
/// JSON directory listings, multipart uploads (verifying `Content-MD5`),
/// streamed downloads, and recursive or non-recursive deletes. Failures can
/// be injected per path, listings can be replaced with arbitrary bodies, and
/// every request is recorded for later assertions.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "mock")]
/// use filer_client::{Filer, MockTransport};
/// # #[cfg(feature = "mock")]
/// use std::sync::Arc;
///
/// # #[cfg(not(feature = "mock"))]
/// # fn main() {}
/// # #[cfg(feature = "mock")]
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(MockTransport::with_files([
///     ("/docs/a.txt", "alpha"),
///     ("/docs/sub/b.txt", "beta"),
/// ]));
/// let filer = Filer::new("http://filer:8888", transport.clone())?;
/// let entries = filer.list_folder("/docs").await?;
/// assert_eq!(entries.len(), 2);
/// assert_eq!(transport.requests().await.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockTransport {
    state: RwLock<State>,
}

impl MockTransport {
    /// A Filer pre-populated with files; parent directories are implied.
    ///
    /// Panics if a path escapes the root. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut state = State::default();
        state.dirs.insert("/".to_string());
        for (path, data) in files {
            let path = path.into();
            let Ok(key) = normalize(&path).map(|p| key_of(&p)) else {
                panic!("MockTransport::with_files: invalid path {path}");
            };
            state.add_parents(&key);
            state.files.insert(key, Bytes::from(data.into()));
        }
        Self { state: RwLock::new(state) }
    }

    /// Add an (empty) directory.
    pub fn with_dir(mut self, path: &str) -> Self {
        let state = self.state.get_mut();
        let key = key_of(path);
        state.add_parents(&key);
        state.dirs.insert(key);
        self
    }

    /// Answer every request for `path` with `status` and a JSON error body.
    pub fn with_failure(mut self, path: &str, status: u16, message: impl Into<String>) -> Self {
        self.state.get_mut().failures.insert(key_of(path), (status, message.into()));
        self
    }

    /// Answer GET requests for `path` with a fixed body instead of a
    /// generated listing.
    pub fn with_listing(mut self, path: &str, body: impl Into<String>) -> Self {
        self.state.get_mut().listings.insert(key_of(path), body.into());
        self
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.read().await.requests.clone()
    }

    /// Stored content of a file.
    pub async fn file(&self, path: &str) -> Option<Bytes> {
        self.state.read().await.files.get(&key_of(path)).cloned()
    }

    /// Whether a file or directory exists.
    pub async fn exists(&self, path: &str) -> bool {
        let state = self.state.read().await;
        let key = key_of(path);
        state.files.contains_key(&key) || state.dirs.contains(&key)
    }

    fn parse(uri: &str) -> Result<(String, Vec<(String, String)>)> {
        let url = Url::parse(uri).or_raise(|| ErrorKind::Transport(uri.to_string()))?;
        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        let query = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        Ok((path, query))
    }

    async fn record(&self, method: Method, uri: &str) -> Result<RecordedRequest> {
        let (path, query) = Self::parse(uri)?;
        let request = RecordedRequest { method, path, query, checksum: None, body: None };
        self.state.write().await.requests.push(request.clone());
        Ok(request)
    }
}
impl Default for MockTransport {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

impl State {
    fn add_parents(&mut self, key: &str) {
        let mut current = parent_of(key);
        while let Some(dir) = current {
            current = parent_of(&dir);
            self.dirs.insert(dir);
        }
    }

    fn failure(&self, key: &str) -> Option<Response> {
        self.failures.get(key).map(|(status, message)| Response::new(*status, json!({ "error": message }).to_string()))
    }

    fn is_empty_dir(&self, key: &str) -> bool {
        !self.files.keys().chain(self.dirs.iter()).any(|p| parent_of(p).as_deref() == Some(key))
    }

    fn listing(&self, dir: &str) -> Response {
        let mut entries: Vec<(String, Value)> = Vec::new();
        for path in self.dirs.iter().filter(|p| parent_of(p).as_deref() == Some(dir)) {
            entries.push((path.clone(), json!({ "FullPath": path, "Mtime": MODIFIED, "Crtime": MODIFIED, "Mode": MODE_DIR })));
        }
        for (path, data) in self.files.iter().filter(|(p, _)| parent_of(p).as_deref() == Some(dir)) {
            entries.push((
                path.clone(),
                json!({
                    "FullPath": path,
                    "Mtime": MODIFIED,
                    "Crtime": MODIFIED,
                    "Mode": MODE_FILE,
                    "Mime": "",
                    "FileSize": data.len(),
                    "chunks": [{ "file_id": format!("3,{:08x}", data.len()), "size": data.len(), "offset": 0 }],
                }),
            ));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        let last_file_name = entries.last().map(|(p, _)| name_of(p).to_string()).unwrap_or_default();
        let entries: Vec<Value> = entries.into_iter().map(|(_, entry)| entry).collect();
        let body = json!({
            "Path": dir,
            "Entries": if entries.is_empty() { Value::Null } else { Value::Array(entries) },
            "Limit": 100,
            "LastFileName": last_file_name,
            "ShouldDisplayLoadMore": false,
        });
        Response::new(200, body.to_string())
    }

    fn read(&self, key: &str) -> Response {
        if let Some(body) = self.listings.get(key) {
            return Response::new(200, body.clone());
        }
        if let Some(data) = self.files.get(key) {
            return Response::new(200, data.clone());
        }
        if self.dirs.contains(key) {
            return self.listing(key);
        }
        Response::new(404, Bytes::new())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, uri: &str, _headers: &[(&str, &str)]) -> Result<Response> {
        let request = self.record(Method::Get, uri).await?;
        let state = self.state.read().await;
        let key = key_of(&request.path);
        Ok(state.failure(&key).unwrap_or_else(|| state.read(&key)))
    }

    async fn get_stream(&self, uri: &str) -> Result<StreamResponse> {
        let response = self.get(uri, &[]).await?;
        let chunks: Vec<std::io::Result<Bytes>> =
            response.body.chunks(DOWNLOAD_CHUNK).map(|chunk| Ok(Bytes::copy_from_slice(chunk))).collect();
        let body: ByteStream = Box::pin(futures::stream::iter(chunks));
        Ok(StreamResponse { status: response.status, body })
    }

    async fn upload(&self, uri: &str, upload: Upload) -> Result<Response> {
        let (path, query) = Self::parse(uri)?;
        let data = match upload.payload {
            Payload::Bytes(bytes) => bytes,
            Payload::Stream { stream, .. } => stream
                .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                    buffer.extend_from_slice(&chunk);
                    Ok(buffer)
                })
                .await
                .or_raise(|| ErrorKind::Transport(uri.to_string()))?
                .freeze(),
        };
        let mut state = self.state.write().await;
        state.requests.push(RecordedRequest {
            method: Method::Post,
            path: path.clone(),
            query,
            checksum: upload.checksum.clone(),
            body: Some(data.clone()),
        });
        let mut key = key_of(&path);
        if let Some(response) = state.failure(&key) {
            return Ok(response);
        }
        if path.ends_with('/') || state.dirs.contains(&key) {
            key = match key.as_str() {
                "/" => format!("/{}", upload.file_name),
                dir => format!("{dir}/{}", upload.file_name),
            };
        }
        if let Some(expected) = &upload.checksum
            && *expected != checksum(&data)
        {
            let body = json!({ "error": "Content-MD5 did not match md5 of file data" });
            return Ok(Response::new(400, body.to_string()));
        }
        state.next_fid += 1;
        let fid = format!("3,{:08x}", state.next_fid);
        let body = json!({
            "name": name_of(&key),
            "size": data.len(),
            "fid": fid,
            "url": format!("http://127.0.0.1:8080/{fid}"),
        });
        state.add_parents(&key);
        state.files.insert(key, data);
        Ok(Response::new(201, body.to_string()))
    }

    async fn delete(&self, uri: &str) -> Result<Response> {
        let request = self.record(Method::Delete, uri).await?;
        let mut state = self.state.write().await;
        let key = key_of(&request.path);
        if let Some(response) = state.failure(&key) {
            return Ok(response);
        }
        if state.files.remove(&key).is_some() {
            return Ok(Response::new(204, Bytes::new()));
        }
        if !state.dirs.contains(&key) {
            return Ok(Response::new(404, Bytes::new()));
        }
        let recursive = request.param(PARAM_RECURSIVE) == Some("true");
        if !recursive && !state.is_empty_dir(&key) {
            let body = json!({ "error": format!("fail to delete non-empty folder: {key}") });
            return Ok(Response::new(500, body.to_string()));
        }
        let prefix = match key.as_str() {
            "/" => "/".to_string(),
            dir => format!("{dir}/"),
        };
        state.files.retain(|p, _| !p.starts_with(&prefix));
        state.dirs.retain(|p| p == "/" || (p != &key && !p.starts_with(&prefix)));
        Ok(Response::new(204, Bytes::new()))
    }
}

/// Storage key: normalized, without trailing slash (except the root).
fn key_of(path: &str) -> String {
    let normalized = normalize(path).unwrap_or_else(|_| path.to_string());
    match normalized.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn parent_of(key: &str) -> Option<String> {
    if key == "/" {
        return None;
    }
    match key.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

fn name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const BASE: &str = "http://filer:8888";

    fn upload(file_name: &str, data: &'static [u8], checksum: Option<String>) -> Upload {
        Upload {
            file_name: file_name.to_string(),
            checksum,
            payload: Payload::Bytes(Bytes::from_static(data)),
        }
    }

    #[tokio::test]
    async fn test_with_files_implies_directories() {
        let transport = MockTransport::with_files([("/a/b/c.txt", "data")]);
        assert!(transport.exists("/a").await);
        assert!(transport.exists("/a/b").await);
        assert!(transport.exists("/a/b/c.txt").await);
        assert!(!transport.exists("/a/c").await);
    }

    #[tokio::test]
    async fn test_listing_shape() {
        let transport = MockTransport::with_files([("/d/file.txt", "12345")]).with_dir("/d/sub");
        let response = transport.get(&format!("{BASE}/d"), &[]).await.unwrap();
        assert_eq!(response.status, 200);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        let entries = body["Entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["FullPath"], "/d/file.txt");
        assert_eq!(entries[0]["FileSize"], 5);
        assert!(entries[0]["chunks"].is_array());
        assert_eq!(entries[1]["FullPath"], "/d/sub");
        assert!(entries[1].get("chunks").is_none());
    }

    #[tokio::test]
    async fn test_empty_listing_is_null() {
        let transport = MockTransport::default().with_dir("/empty");
        let response = transport.get(&format!("{BASE}/empty/"), &[]).await.unwrap();
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["Entries"].is_null());
    }

    #[tokio::test]
    async fn test_upload_into_directory() {
        let transport = MockTransport::default();
        let response = transport.upload(&format!("{BASE}/inbox/"), upload("note.txt", b"hi", None)).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(transport.file("/inbox/note.txt").await.unwrap(), Bytes::from_static(b"hi"));
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["name"], "note.txt");
        assert_eq!(body["fid"], "3,00000001");
    }

    #[tokio::test]
    async fn test_upload_checksum_mismatch() {
        let transport = MockTransport::default();
        let bad = Some(checksum(b"something else"));
        let response = transport.upload(&format!("{BASE}/x.txt"), upload("x.txt", b"data", bad)).await.unwrap();
        assert_eq!(response.status, 400);
        assert!(transport.file("/x.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_stream_download_chunks() {
        let transport = MockTransport::with_files([("/big.bin", "0123456789")]);
        let response = transport.get_stream(&format!("{BASE}/big.bin")).await.unwrap();
        assert_eq!(response.status, 200);
        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_non_empty_requires_recursive() {
        let transport = MockTransport::with_files([("/d/a.txt", "a"), ("/d/e/b.txt", "b"), ("/keep.txt", "k")]);
        let response = transport.delete(&format!("{BASE}/d")).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(transport.exists("/d/a.txt").await);
        let response = transport.delete(&format!("{BASE}/d?recursive=true")).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(!transport.exists("/d").await);
        assert!(!transport.exists("/d/e/b.txt").await);
        assert!(transport.exists("/keep.txt").await);
    }

    #[tokio::test]
    async fn test_failure_injection_and_recording() {
        let transport = MockTransport::with_files([("/a.txt", "a")]).with_failure("/a.txt", 503, "overloaded");
        let response = transport.get(&format!("{BASE}/a.txt?collection=c"), &[]).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.text(), r#"{"error":"overloaded"}"#);
        let requests = transport.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "/a.txt");
        assert_eq!(requests[0].param("collection"), Some("c"));
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockTransport::with_files([("/../escape", "bad")]);
    }
}
