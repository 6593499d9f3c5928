//! Error types for site adapter operations.

use thiserror::Error;

use crate::download::{DownloadError, PoolError};

/// Errors raised while discovering or resolving content on a site.
#[derive(Debug, Error)]
pub enum SiteError {
    /// The request itself failed (transport error or unexpected status).
    #[error("[{site}] request failed: {source}")]
    Request {
        /// Site identifier.
        site: &'static str,
        /// Underlying transport error.
        #[source]
        source: DownloadError,
    },

    /// A listing or page body could not be decoded.
    #[error("[{site}] could not decode {what} from {url}: {reason}")]
    Decode {
        /// Site identifier.
        site: &'static str,
        /// What was being decoded (e.g. "catalog page").
        what: &'static str,
        /// Source URL.
        url: String,
        /// Decoder message.
        reason: String,
    },

    /// The requested page does not exist.
    #[error("[{site}] not found: {url}")]
    NotFound {
        /// Site identifier.
        site: &'static str,
        /// The URL that returned 404/410.
        url: String,
    },

    /// No hash strategy produced a candidate that serves asset 0.
    #[error("[{site}] no asset hash found for {slug} chapter {chapter}")]
    HashNotFound {
        /// Site identifier.
        site: &'static str,
        /// Series slug.
        slug: String,
        /// Chapter display number.
        chapter: String,
    },

    /// A chapter page had no extractable asset list.
    #[error("[{site}] no assets found for {slug} chapter {chapter}")]
    NoAssets {
        /// Site identifier.
        site: &'static str,
        /// Series slug.
        slug: String,
        /// Chapter display number.
        chapter: String,
    },

    /// Not a single catalog listing page could be fetched and decoded.
    #[error("[{site}] catalog unavailable: all {pages} listing page(s) failed")]
    CatalogUnavailable {
        /// Site identifier.
        site: &'static str,
        /// Pages attempted.
        pages: u32,
    },

    /// The operation is not offered by this site.
    #[error("[{site}] {operation} is not supported")]
    Unsupported {
        /// Site identifier.
        site: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// The adapter's catalog page pool failed.
    #[error("[{site}] worker pool error: {source}")]
    Pool {
        /// Site identifier.
        site: &'static str,
        /// Underlying pool error.
        #[source]
        source: PoolError,
    },
}

impl SiteError {
    /// Maps a transport error, promoting 404/410 to [`SiteError::NotFound`].
    pub fn request(site: &'static str, source: DownloadError) -> Self {
        match source {
            DownloadError::NotFound { url, .. } => Self::NotFound { site, url },
            source => Self::Request { site, source },
        }
    }

    /// Creates a decode error.
    pub fn decode(
        site: &'static str,
        what: &'static str,
        url: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Decode {
            site,
            what,
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a hash-not-found error.
    pub fn hash_not_found(site: &'static str, slug: &str, chapter: &str) -> Self {
        Self::HashNotFound {
            site,
            slug: slug.to_string(),
            chapter: chapter.to_string(),
        }
    }

    /// Creates a no-assets error.
    pub fn no_assets(site: &'static str, slug: &str, chapter: &str) -> Self {
        Self::NoAssets {
            site,
            slug: slug.to_string(),
            chapter: chapter.to_string(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(site: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { site, operation }
    }

    /// Creates a pool error.
    #[must_use]
    pub fn pool(site: &'static str, source: PoolError) -> Self {
        Self::Pool { site, source }
    }

    /// True for not-found responses, which drive enumeration termination.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
