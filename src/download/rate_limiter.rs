//! Optional per-host request spacing.
//!
//! The pipeline's asset delay throttles each task on its own; this limiter is
//! the shared alternative. When enabled, consecutive requests to the same host
//! are spaced at least `min_interval` apart regardless of which task sends
//! them. Different hosts never wait on each other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use manhwa_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(250));
//! limiter.acquire("https://cdn.example/a/0.webp").await; // immediate
//! limiter.acquire("https://cdn.example/a/1.webp").await; // waits ~250ms
//! limiter.acquire("https://site.example/series").await;  // different host, immediate
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per host.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Per-host spacing of outgoing requests.
///
/// Shared behind `Arc` by every downloader in one run.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    disabled: bool,
    /// Arc so the map shard lock is released before awaiting the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// `None` until the first request to the host.
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `min_interval`.
    ///
    /// A zero interval yields a disabled limiter.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = min_interval.as_millis()))]
    pub fn new(min_interval: Duration) -> Self {
        if min_interval.is_zero() {
            return Self::disabled();
        }
        debug!("creating rate limiter");
        Self {
            min_interval,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether spacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Minimum spacing between same-host requests.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request to `url`'s host is allowed, then records it.
    ///
    /// The first request to any host proceeds immediately.
    #[instrument(level = "trace", skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "spacing request"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "rate limit has delayed this host for over a minute; consider a smaller --rate-limit"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

/// Extracts the lowercase host from a URL, or `"unknown"` for malformed input.
///
/// ```
/// use manhwa_core::download::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://CDN.Example/a/0.webp"), "cdn.example");
/// assert_eq!(extract_host("http://localhost:8080/x"), "localhost");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_zero_interval_is_disabled() {
        let limiter = RateLimiter::new(Duration::ZERO);
        assert!(limiter.is_disabled());
        assert_eq!(limiter.min_interval(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled_no_delay() {
        let limiter = RateLimiter::disabled();
        let start = std::time::Instant::now();
        for i in 0..5 {
            limiter.acquire(&format!("https://cdn.example/{i}.webp")).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_rate_limiter_first_request_no_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = std::time::Instant::now();
        limiter.acquire("https://cdn.example/0.webp").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_same_host() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = std::time::Instant::now();
        limiter.acquire("https://cdn.example/0.webp").await;
        limiter.acquire("https://cdn.example/1.webp").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_rate_limiter_hosts_independent() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.acquire("https://cdn.example/0.webp").await;
        let start = std::time::Instant::now();
        limiter.acquire("https://site.example/series").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_extract_host_with_port_and_case() {
        assert_eq!(extract_host("https://Gg.AsuraComic.net:443/x"), "gg.asuracomic.net");
        assert_eq!(extract_host("http://127.0.0.1:9000/a"), "127.0.0.1");
    }

    #[test]
    fn test_extract_host_malformed() {
        assert_eq!(extract_host(""), "unknown");
        assert_eq!(extract_host("cdn.example/no-scheme"), "unknown");
    }
}
