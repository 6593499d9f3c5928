//! Retrying downloader: one URL to one durable file.
//!
//! Each attempt goes through the [`Transport`], streams a 200 body into
//! `<dest>.part` and renames it onto `dest` once flushed. Transient failures
//! sleep `base_delay × attempt` and retry; a not-found returns after the
//! first request.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::error::DownloadError;
use super::paths::ensure_dir;
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::transport::{Transport, TransportResponse};

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Final path of the written file.
    pub path: PathBuf,
    /// Bytes copied from the response body.
    pub bytes_written: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Wraps a [`Transport`] with retry, backoff and atomic file writes.
///
/// Shared behind `Arc` by every task in a run.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    retries: AtomicU64,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("policy", &self.policy)
            .field("rate_limiter", &self.rate_limiter)
            .field("retries", &self.retries.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader with per-host spacing disabled.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self::with_rate_limiter(transport, policy, Arc::new(RateLimiter::disabled()))
    }

    /// Creates a downloader that waits on `rate_limiter` before every attempt.
    #[must_use]
    pub fn with_rate_limiter(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            policy,
            rate_limiter,
            retries: AtomicU64::new(0),
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Total retry sleeps taken across all downloads so far.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Downloads `url` to `dest`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] after a single 404/410 response
    /// - [`DownloadError::RetriesExhausted`] when every attempt failed transiently
    /// - the first permanent error (invalid URL, other 4xx) as-is
    #[instrument(skip(self, headers), fields(dest = %dest.display()))]
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        headers: &HeaderMap,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut attempt: u32 = 1;
        loop {
            self.rate_limiter.acquire(url).await;

            let error = match self.attempt(url, dest, headers).await {
                Ok(bytes_written) => {
                    debug!(bytes_written, attempt, "download complete");
                    return Ok(DownloadOutcome {
                        path: dest.to_path_buf(),
                        bytes_written,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            let failure = classify_error(&error);
            match self.policy.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "transient failure, retrying"
                    );
                    self.retries.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, error = %error, "giving up");
                    return Err(match failure {
                        FailureType::Transient => {
                            DownloadError::retries_exhausted(url, attempt, error)
                        }
                        FailureType::NotFound | FailureType::Permanent => error,
                    });
                }
            }
        }
    }

    /// One request plus one streamed write. Returns bytes written.
    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        headers: &HeaderMap,
    ) -> Result<u64, DownloadError> {
        let response = self.transport.get(url, headers).await?.error_for_status()?;

        if let Some(parent) = dest.parent() {
            ensure_dir(parent).await?;
        }

        let part = part_path(dest);
        match write_part(response, &part).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&part, dest).await {
                    remove_partial(&part).await;
                    return Err(DownloadError::io(dest, e));
                }
                Ok(bytes)
            }
            Err(e) => {
                remove_partial(&part).await;
                Err(e)
            }
        }
    }
}

/// Streams the body into `part`, returning bytes written.
async fn write_part(response: TransportResponse, part: &Path) -> Result<u64, DownloadError> {
    let file = File::create(part)
        .await
        .map_err(|e| DownloadError::io(part, e))?;
    let mut writer = BufWriter::new(file);
    let mut body = response.into_body();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(part, e))?;

    Ok(bytes_written)
}

async fn remove_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %part.display(), error = %e, "failed to remove partial file");
        }
    }
}

/// `<dest>.part`
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
