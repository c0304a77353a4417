//! Wiremock responders that serve a fixed body with byte-range support.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking test payload.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves `body` honoring `Range: bytes=a-b` / `bytes=a-`.
///
/// HEAD is answered with 405 so the probe goes through the ranged GET
/// fallback. Every Range header seen is recorded.
#[derive(Clone)]
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    delay: Duration,
    ranges: Arc<Mutex<Vec<String>>>,
    requests: Arc<AtomicUsize>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            delay: Duration::ZERO,
            ranges: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delays every response by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Range headers received so far, in arrival order.
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }

    /// Number of GET requests received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn mount(&self, server: &MockServer, route: &str) {
        Mock::given(method("HEAD"))
            .and(path(route.to_string()))
            .respond_with(ResponseTemplate::new(405))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(route.to_string()))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    fn parse_range(&self, header: &str) -> Option<(usize, usize)> {
        let spec = header.strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start: usize = start.trim().parse().ok()?;
        let last = self.body.len().checked_sub(1)?;
        let end = if end.trim().is_empty() {
            last
        } else {
            end.trim().parse::<usize>().ok()?.min(last)
        };
        (start <= end).then_some((start, end))
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let template = match range {
            Some(header) => {
                self.ranges.lock().unwrap().push(header.clone());
                match self.parse_range(&header) {
                    Some((start, end)) => ResponseTemplate::new(206)
                        .insert_header(
                            "Content-Range",
                            format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                        )
                        .insert_header("Accept-Ranges", "bytes")
                        .set_body_bytes(self.body[start..=end].to_vec()),
                    None => ResponseTemplate::new(416)
                        .insert_header("Content-Range", format!("bytes */{}", self.body.len()).as_str()),
                }
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone()),
        };
        template.set_delay(self.delay)
    }
}

/// Serves `body` in full for every GET, ignoring Range headers, and answers
/// HEAD without `Accept-Ranges`.
pub async fn mount_plain(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("HEAD"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Counts requests and fails the first `fail_count` GETs with 500 before
/// serving ranges from `inner`.
pub struct FlakyResponder {
    pub inner: RangeResponder,
    pub fail_count: usize,
    pub seen: Arc<AtomicUsize>,
}

impl Respond for FlakyResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(500).set_body_bytes(b"internal server error".to_vec())
        } else {
            self.inner.respond(request)
        }
    }
}
