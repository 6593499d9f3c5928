//! Error types for the download module.
//!
//! This module defines structured errors for transport calls and file
//! downloads, carrying the URL or path that failed so callers can log
//! useful context without re-threading it.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used for transport-level failures from any client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while fetching a URL or writing it to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, body stream interrupted).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status other than not-found.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server reported the resource does not exist (404 / 410).
    ///
    /// Never retried: this is the termination signal for open-ended enumeration.
    #[error("not found (HTTP {status}): {url}")]
    NotFound {
        /// The URL that was not found.
        url: String,
        /// The HTTP status code (404 or 410).
        status: u16,
    },

    /// File system error while writing a download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: BoxError,
    },

    /// Every attempt failed with a transient error.
    #[error("failed after {attempts} attempts fetching {url}: {last}")]
    RetriesExhausted {
        /// The URL that kept failing.
        url: String,
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Creates a network error from any transport error.
    pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates an error for a non-success HTTP status.
    ///
    /// 404 and 410 become [`DownloadError::NotFound`]; everything else is
    /// [`DownloadError::HttpStatus`].
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        if matches!(status, 404 | 410) {
            Self::NotFound {
                url: url.into(),
                status,
            }
        } else {
            Self::HttpStatus {
                url: url.into(),
                status,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client_build(source: impl Into<BoxError>) -> Self {
        Self::ClientBuild {
            source: source.into(),
        }
    }

    /// Wraps the last error of an exhausted retry loop.
    pub fn retries_exhausted(url: impl Into<String>, attempts: u32, last: DownloadError) -> Self {
        Self::RetriesExhausted {
            url: url.into(),
            attempts,
            last: Box::new(last),
        }
    }

    /// Returns true when the failure means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_not_found(),
            _ => false,
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::NotFound { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

// No blanket From<reqwest::Error> / From<std::io::Error>: every variant needs
// the url or path, which only the caller has.
