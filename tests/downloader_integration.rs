//! Integration tests for the retrying downloader over real HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use manhwa_core::download::{DownloadError, Downloader, HttpTransport, RetryPolicy};
mod support;
use support::socket_guard::start_mock_server_or_skip;

fn downloader(max_attempts: u32, base_delay: Duration) -> Downloader {
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    Downloader::new(transport, RetryPolicy::new(max_attempts, base_delay))
}

#[tokio::test]
async fn test_not_found_is_requested_exactly_once() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/solo/0_1/en/abcd1234/5.webp"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/solo/0_1/en/abcd1234/5.webp", mock_server.uri());
    let dest = temp_dir.path().join("solo/chapter_1/005.webp");
    let err = downloader(3, Duration::from_millis(50))
        .download(&url, &dest, &HeaderMap::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, DownloadError::NotFound { status: 404, .. }),
        "expected NotFound, got {err:?}"
    );
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_two_server_errors_then_success_uses_linear_backoff() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/page.webp"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"webp-bytes".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let base = Duration::from_millis(100);
    let downloader = downloader(3, base);
    let url = format!("{}/page.webp", mock_server.uri());
    let dest = temp_dir.path().join("000.webp");

    let start = Instant::now();
    let outcome = downloader
        .download(&url, &dest, &HeaderMap::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(downloader.retries(), 2);
    assert_eq!(std::fs::read(&dest).unwrap(), b"webp-bytes");
    // base × 1 + base × 2
    assert!(elapsed >= base * 3, "slept too little: {elapsed:?}");
    assert!(elapsed < base * 3 + Duration::from_secs(2), "slept too long: {elapsed:?}");
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_attempts() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/flaky.webp"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let url = format!("{}/flaky.webp", mock_server.uri());
    let dest = temp_dir.path().join("000.webp");
    let err = downloader(2, Duration::from_millis(10))
        .download(&url, &dest, &HeaderMap::new())
        .await
        .unwrap_err();

    match err {
        DownloadError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(last.status(), Some(503));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/private.webp"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/private.webp", mock_server.uri());
    let err = downloader(3, Duration::from_millis(10))
        .download(&url, &temp_dir.path().join("x.webp"), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
}

#[tokio::test]
async fn test_success_leaves_no_part_file() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/cover.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
        .mount(&mock_server)
        .await;

    let url = format!("{}/cover.jpg", mock_server.uri());
    let dest = temp_dir.path().join("solo").join("cover.jpg");
    let outcome = downloader(3, Duration::from_millis(10))
        .download(&url, &dest, &HeaderMap::new())
        .await
        .unwrap();

    assert_eq!(outcome.bytes_written, 64 * 1024);
    let names: Vec<_> = std::fs::read_dir(temp_dir.path().join("solo"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["cover.jpg"]);
}
