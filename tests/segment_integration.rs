//! Integration tests for the segment downloader's retry behavior.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rangeget::download::{
    DownloadError, DownloadOptions, DownloadSegment, DownloadStatus, HttpClientFactory,
    SegmentDownloader, SharedSegment,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::range_server::{FlakyResponder, RangeResponder, payload};
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn downloader(options: &DownloadOptions) -> SegmentDownloader {
    SegmentDownloader::new(HttpClientFactory::new().create_client(options).unwrap())
}

fn shared(segment: DownloadSegment) -> SharedSegment {
    Arc::new(Mutex::new(segment))
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let server = require_mock_server!();
    let body = payload(400);
    let seen = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(FlakyResponder {
            inner: RangeResponder::new(body.clone()),
            fail_count: 2,
            seen: Arc::clone(&seen),
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let options = DownloadOptions::new(format!("{}/flaky.bin", server.uri()), dir.path())
        .with_retry(3, Duration::from_millis(10));
    let segment = shared(DownloadSegment::new(
        1,
        "dl",
        100,
        Some(299),
        dir.path().join("seg1.tmp"),
    ));
    let reported = AtomicU64::new(0);
    let on_bytes = |n: u64| {
        reported.fetch_add(n, Ordering::SeqCst);
    };

    downloader(&options)
        .download_segment(&segment, &options, &on_bytes, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(reported.load(Ordering::SeqCst), 200);
    let seg = segment.lock().unwrap().clone();
    assert_eq!(seg.status, DownloadStatus::Completed);
    assert_eq!(seg.downloaded_bytes, 200);
    assert!(seg.error_message.is_none());
    assert_eq!(std::fs::read(dir.path().join("seg1.tmp")).unwrap(), &body[100..300]);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let server = require_mock_server!();
    let seen = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/down.bin"))
        .respond_with(FlakyResponder {
            inner: RangeResponder::new(payload(100)),
            fail_count: usize::MAX,
            seen: Arc::clone(&seen),
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let options = DownloadOptions::new(format!("{}/down.bin", server.uri()), dir.path())
        .with_retry(2, Duration::from_millis(10));
    let segment = shared(DownloadSegment::new(
        0,
        "dl",
        0,
        Some(99),
        dir.path().join("seg0.tmp"),
    ));

    let err = downloader(&options)
        .download_segment(&segment, &options, &|_: u64| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { status: 500, .. }));
    assert_eq!(seen.load(Ordering::SeqCst), 3, "one attempt plus two retries");
    let seg = segment.lock().unwrap().clone();
    assert_eq!(seg.status, DownloadStatus::Failed);
    assert!(seg.error_message.unwrap().contains("500"));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let options = DownloadOptions::new(format!("{}/gone.bin", server.uri()), dir.path())
        .with_retry(3, Duration::from_millis(10));
    let segment = shared(DownloadSegment::new(
        0,
        "dl",
        0,
        Some(99),
        dir.path().join("seg0.tmp"),
    ));

    let err = downloader(&options)
        .download_segment(&segment, &options, &|_: u64| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
    assert_eq!(segment.lock().unwrap().status, DownloadStatus::Failed);
}

#[tokio::test]
async fn test_partial_segment_requests_only_missing_bytes() {
    let server = require_mock_server!();
    let body = payload(500);
    let responder = RangeResponder::new(body.clone());
    responder.mount(&server, "/partial.bin").await;

    let dir = TempDir::new().unwrap();
    let temp = dir.path().join("seg2.tmp");
    std::fs::write(&temp, &body[200..260]).unwrap();

    let options = DownloadOptions::new(format!("{}/partial.bin", server.uri()), dir.path())
        .with_retry(0, Duration::from_millis(10));
    let mut segment = DownloadSegment::new(2, "dl", 200, Some(399), &temp);
    assert_eq!(segment.adopt_existing_file().await.unwrap(), 60);
    let segment = shared(segment);

    downloader(&options)
        .download_segment(&segment, &options, &|_: u64| {}, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(responder.ranges(), vec!["bytes=260-399".to_string()]);
    assert_eq!(std::fs::read(&temp).unwrap(), &body[200..400]);
}

#[tokio::test]
async fn test_cancelled_token_stops_before_any_request() {
    let server = require_mock_server!();
    let responder = RangeResponder::new(payload(100));
    responder.mount(&server, "/never.bin").await;

    let dir = TempDir::new().unwrap();
    let options = DownloadOptions::new(format!("{}/never.bin", server.uri()), dir.path());
    let segment = shared(DownloadSegment::new(
        0,
        "dl",
        0,
        Some(99),
        dir.path().join("seg0.tmp"),
    ));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = downloader(&options)
        .download_segment(&segment, &options, &|_: u64| {}, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(responder.requests(), 0);
}
