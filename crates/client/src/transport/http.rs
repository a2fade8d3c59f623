//! HTTP transport backed by `reqwest`.

use super::{ByteStream, Payload, Response, StreamResponse, Transport, Upload};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use std::time::Duration;

const CONTENT_MD5: &str = "Content-MD5";
const USER_AGENT: &str = concat!("filer-client/", env!("CARGO_PKG_VERSION"));

/// Transport over a shared [`reqwest::Client`].
///
/// Cloning is cheap; clones share the same connection pool.
///
/// # Examples
///
/// ```no_run
/// use filer_client::{Filer, HttpTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> filer_client::error::Result<()> {
/// let transport = HttpTransport::with_timeout(Duration::from_secs(30))?;
/// let filer = Filer::new("http://localhost:8888", Arc::new(transport))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Transport without any request timeout.
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Transport that abandons any request taking longer than `timeout`,
    /// body included.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::build(Some(timeout))
    }

    /// Wrap an already configured client (proxies, TLS roots, auth headers).
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn build(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().or_raise(|| ErrorKind::Transport("unable to build HTTP client".to_string()))?;
        Ok(Self { client })
    }

    async fn send(request: RequestBuilder, uri: &str) -> Result<reqwest::Response> {
        request.send().await.or_raise(|| ErrorKind::Transport(uri.to_string()))
    }

    async fn buffer(response: reqwest::Response, uri: &str) -> Result<Response> {
        let status = response.status().as_u16();
        let body = response.bytes().await.or_raise(|| ErrorKind::Transport(uri.to_string()))?;
        tracing::trace!(%uri, status, bytes = body.len(), "Response received");
        Ok(Response { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Result<Response> {
        let mut request = self.client.get(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = Self::send(request, uri).await?;
        Self::buffer(response, uri).await
    }

    async fn get_stream(&self, uri: &str) -> Result<StreamResponse> {
        let response = Self::send(self.client.get(uri), uri).await?;
        let status = response.status().as_u16();
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(StreamResponse { status, body })
    }

    async fn upload(&self, uri: &str, upload: Upload) -> Result<Response> {
        let Upload { file_name, checksum, payload } = upload;
        let part = match payload {
            Payload::Bytes(bytes) => {
                let length = bytes.len() as u64;
                Part::stream_with_length(Body::from(bytes), length)
            },
            Payload::Stream { stream, length: Some(length) } => Part::stream_with_length(Body::wrap_stream(stream), length),
            Payload::Stream { stream, length: None } => Part::stream(Body::wrap_stream(stream)),
        };
        let form = Form::new().part("file", part.file_name(file_name));
        let mut request = self.client.post(uri).multipart(form);
        if let Some(checksum) = checksum {
            request = request.header(CONTENT_MD5, checksum);
        }
        let response = Self::send(request, uri).await?;
        Self::buffer(response, uri).await
    }

    async fn delete(&self, uri: &str) -> Result<Response> {
        let response = Self::send(self.client.delete(uri), uri).await?;
        Self::buffer(response, uri).await
    }
}
