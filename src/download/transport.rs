//! Single-shot HTTP GET behind a trait.
//!
//! A [`Transport`] performs exactly one request and hands back the status and
//! a body stream. It never interprets status codes: a 404 is a successful
//! transport call whose [`TransportResponse::status`] is 404. Retry lives one
//! layer up in [`super::Downloader`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, instrument};

use super::error::DownloadError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Abstraction over one GET request/response cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a GET for `url` with exactly the given headers.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`], [`DownloadError::Network`] or
    /// [`DownloadError::InvalidUrl`] for transport-level failures only.
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse, DownloadError>;
}

/// Status plus a streaming body.
///
/// Dropping the response releases the underlying connection.
pub struct TransportResponse {
    url: String,
    status: u16,
    body: BoxStream<'static, Result<Bytes, DownloadError>>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("url", &self.url)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    /// Creates a response from a status and a chunk stream.
    pub fn new(
        url: impl Into<String>,
        status: u16,
        body: BoxStream<'static, Result<Bytes, DownloadError>>,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            body,
        }
    }

    /// Creates a response whose body is a single in-memory chunk.
    pub fn from_bytes(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        let chunk: Bytes = body.into();
        Self::new(url, status, stream::once(async move { Ok(chunk) }).boxed())
    }

    /// The HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for exactly HTTP 200.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// The URL that produced this response.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Turns the response into an error unless it is HTTP 200.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] for 404/410 and
    /// [`DownloadError::HttpStatus`] otherwise.
    pub fn error_for_status(self) -> Result<Self, DownloadError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(DownloadError::http_status(self.url, self.status))
        }
    }

    /// Hands the body stream to the caller.
    #[must_use]
    pub fn into_body(self) -> BoxStream<'static, Result<Bytes, DownloadError>> {
        self.body
    }

    /// Buffers the whole body as UTF-8 text (lossy).
    ///
    /// Only used for listing pages and markup, never for assets.
    ///
    /// # Errors
    ///
    /// Returns the first body stream error.
    pub async fn text(self) -> Result<String, DownloadError> {
        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a client with the given total request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend cannot initialize.
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(DownloadError::client_build)?;
        debug!(timeout_secs = timeout.as_secs(), "built HTTP transport");
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "trace", skip(self, headers))]
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse, DownloadError> {
        let parsed = url::Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(parsed)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e)
                }
            })?;

        let status = response.status().as_u16();
        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    if e.is_timeout() {
                        DownloadError::timeout(owned_url.clone())
                    } else {
                        DownloadError::network(owned_url.clone(), e)
                    }
                })
            })
            .boxed();

        Ok(TransportResponse::new(url, status, body))
    }
}
