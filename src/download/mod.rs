//! Fetching and storing assets.
//!
//! - [`Transport`] performs one GET and returns status plus a body stream
//! - [`Downloader`] adds linear-backoff retry and atomic `.part` writes on top
//! - [`WorkerPool`] bounds how many units of one stage run at once
//! - [`RateLimiter`] optionally spaces requests per host
//! - [`OutputLayout`] derives every file path from (slug, chapter, index)
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use manhwa_core::download::{Downloader, HttpTransport, RetryPolicy};
//! use reqwest::header::HeaderMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(15))?);
//! let downloader = Downloader::new(transport, RetryPolicy::default());
//! let outcome = downloader
//!     .download(
//!         "https://cdn.example/solo/0_1/en/abcd1234/0.webp",
//!         Path::new("downloads/solo/chapter_1/000.webp"),
//!         &HeaderMap::new(),
//!     )
//!     .await?;
//! println!("wrote {} bytes", outcome.bytes_written);
//! # Ok(())
//! # }
//! ```

mod downloader;
mod error;
pub mod paths;
mod pool;
pub mod rate_limiter;
mod retry;
mod transport;

pub use downloader::{DownloadOutcome, Downloader};
pub use error::{BoxError, DownloadError};
pub use paths::{OutputLayout, ensure_dir, image_extension, sanitize_segment};
pub use pool::{PoolError, WorkerPermit, WorkerPool};
pub use rate_limiter::{RateLimiter, extract_host};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};
pub use transport::{DEFAULT_TIMEOUT, HttpTransport, Transport, TransportResponse};

// Per project convention there are no module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
