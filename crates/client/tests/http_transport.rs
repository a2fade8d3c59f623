//! `HttpTransport` against a throwaway HTTP server on localhost.

use filer_client::error::ErrorKind;
use filer_client::{Filer, HttpTransport, QueryParams, UploadOptions, checksum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server saw of a single request.
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}
impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let read = stream.read(&mut chunk).await.unwrap();
        assert!(read > 0, "connection closed before request head");
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break position + 4;
        }
    };
    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines.next().unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut body = buffer[head_end..].to_vec();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse::<usize>().unwrap());
    let chunked = headers.iter().any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"));
    loop {
        let complete = match (content_length, chunked) {
            (Some(length), _) => body.len() >= length,
            (None, true) => body.ends_with(b"0\r\n\r\n"),
            (None, false) => true,
        };
        if complete {
            break;
        }
        let read = stream.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    Captured { request_line, headers, body }
}

/// Serve exactly one request with a canned response.
async fn serve_once(status: u16, body: &str) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let body = body.to_string();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let captured = read_request(&mut stream).await;
        let response = match status {
            204 => "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string(),
            _ => format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ),
        };
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        captured
    });
    (url, handle)
}

fn filer(url: &str) -> Filer {
    let transport = HttpTransport::with_timeout(Duration::from_secs(10)).unwrap();
    Filer::new(url, Arc::new(transport)).unwrap()
}

#[tokio::test]
async fn list_folder_over_http() {
    let listing = r#"{
        "Path": "/docs",
        "Entries": [
            {"FullPath": "/docs/a.txt", "FileSize": 3, "chunks": [{"file_id": "3,01"}]},
            {"FullPath": "/docs/sub", "Mode": 2147484141}
        ]
    }"#;
    let (url, server) = serve_once(200, listing).await;
    let entries = filer(&url).list_folder("/docs").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].is_directory());
    assert!(entries[1].is_directory());

    let captured = server.await.unwrap();
    assert_eq!(captured.request_line, "GET /docs HTTP/1.1");
    assert_eq!(captured.header("accept"), Some("application/json"));
    assert!(captured.header("user-agent").unwrap().starts_with("filer-client/"));
}

#[tokio::test]
async fn list_folder_not_found_over_http() {
    let (url, server) = serve_once(404, "").await;
    let err = filer(&url).list_folder("/missing").await.unwrap_err();
    assert_eq!(*err, ErrorKind::NotFound("/missing".to_string()));
    server.await.unwrap();
}

#[tokio::test]
async fn upload_file_over_http() {
    let temp_dir = tempfile::tempdir().unwrap();
    let local = temp_dir.path().join("notes.txt");
    std::fs::write(&local, b"remember the milk").unwrap();
    let (url, server) = serve_once(201, r#"{"name": "notes.txt", "size": 17, "fid": "3,0a", "url": "http://v:8080/3,0a"}"#).await;
    let result = filer(&url)
        .upload_file(&local, "/inbox/notes.txt", &UploadOptions::new().collection("mail"))
        .await
        .unwrap();
    assert_eq!(result.file_id, "3,0a");
    assert_eq!(result.size, 17);

    let captured = server.await.unwrap();
    assert_eq!(captured.request_line, "POST /inbox/notes.txt?collection=mail HTTP/1.1");
    let expected_md5 = checksum(b"remember the milk");
    assert_eq!(captured.header("content-md5"), Some(expected_md5.as_str()));
    assert!(captured.header("content-type").unwrap().starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&captured.body);
    assert!(body.contains(r#"name="file"; filename="notes.txt""#));
    assert!(body.contains("remember the milk"));
}

#[tokio::test]
async fn upload_rejected_over_http() {
    let temp_dir = tempfile::tempdir().unwrap();
    let local = temp_dir.path().join("big.bin");
    std::fs::write(&local, b"payload").unwrap();
    let (url, server) = serve_once(413, r#"{"error": "file over the limit"}"#).await;
    let err = filer(&url).upload_file(&local, "/big.bin", &UploadOptions::default()).await.unwrap_err();
    assert_eq!(*err, ErrorKind::UploadRejected("file over the limit".to_string()));
    server.await.unwrap();
}

#[tokio::test]
async fn delete_folder_over_http() {
    let (url, server) = serve_once(204, "").await;
    filer(&url).delete_folder("/old/data").await.unwrap();
    let captured = server.await.unwrap();
    assert_eq!(captured.request_line, "DELETE /old/data?recursive=true HTTP/1.1");
}

#[tokio::test]
async fn download_over_http() {
    let (url, server) = serve_once(200, "streamed file content").await;
    let mut buffer: Vec<u8> = Vec::new();
    let copied = filer(&url)
        .download_to("/files/content.txt", &QueryParams::new(), &mut buffer)
        .await
        .unwrap();
    assert_eq!(copied, 21);
    assert_eq!(buffer, b"streamed file content");
    let captured = server.await.unwrap();
    assert_eq!(captured.request_line, "GET /files/content.txt HTTP/1.1");
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let err = filer(&url).list_folder("/").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Transport(_)));
    assert!(err.is_retryable());
}
