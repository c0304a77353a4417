//! Pre-transfer probe of a remote resource.

use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    HeaderMap, LAST_MODIFIED,
};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadError;
use super::client::{HttpClientFactory, range_header, send_request};
use super::filename::resolve_filename;
use super::options::DownloadOptions;

/// What the server told us about a resource before the transfer starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadInfo {
    /// Size in bytes, `-1` when unknown.
    pub content_length: i64,
    /// Whether byte-range requests are honored.
    pub supports_partial_content: bool,
    /// Suggested file name from Content-Disposition or the URL path.
    pub file_name: Option<String>,
    /// Content-Type header value.
    pub content_type: Option<String>,
    /// ETag header value.
    pub etag: Option<String>,
    /// Last-Modified header value.
    pub last_modified: Option<String>,
}

impl DownloadInfo {
    /// Size when the server reported a positive one.
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        u64::try_from(self.content_length).ok().filter(|len| *len > 0)
    }
}

/// Issues the HEAD (or ranged GET) probe for a download.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadInfoProvider {
    factory: HttpClientFactory,
}

impl DownloadInfoProvider {
    /// Creates a provider using `factory` for its clients.
    #[must_use]
    pub fn new(factory: HttpClientFactory) -> Self {
        Self { factory }
    }

    /// Probes `url` with the proxy/auth/timeout of `options`.
    ///
    /// Sends HEAD first; on 405 falls back to `GET` with `Range: bytes=0-0`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the server is unreachable or answers
    /// with an error status, and [`DownloadError::Cancelled`] if `cancel`
    /// fires first.
    #[instrument(skip(self, options, cancel))]
    pub async fn probe(
        &self,
        url: &str,
        options: &DownloadOptions,
        cancel: &CancellationToken,
    ) -> Result<DownloadInfo, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let client = self.factory.create_client(options)?;

        let head = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = send_request(&client, Method::HEAD, url, None) => result,
        };

        let info = match head {
            Ok(response) => from_head(response.headers(), &parsed),
            Err(DownloadError::HttpStatus { status, .. })
                if status == StatusCode::METHOD_NOT_ALLOWED.as_u16() =>
            {
                debug!("HEAD not allowed, falling back to ranged GET");
                let range = range_header(0, Some(0));
                let response = tokio::select! {
                    () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    result = send_request(&client, Method::GET, url, Some(&range)) => result?,
                };
                from_ranged_get(response.status(), response.headers(), &parsed)
            }
            Err(e) => return Err(e),
        };

        info!(
            content_length = info.content_length,
            partial = info.supports_partial_content,
            file_name = ?info.file_name,
            "probe complete"
        );
        Ok(info)
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn common_fields(headers: &HeaderMap, url: &Url) -> DownloadInfo {
    let disposition = header_string(headers, CONTENT_DISPOSITION);
    DownloadInfo {
        content_length: -1,
        supports_partial_content: false,
        file_name: resolve_filename(disposition.as_deref(), url),
        content_type: header_string(headers, CONTENT_TYPE),
        etag: header_string(headers, ETAG),
        last_modified: header_string(headers, LAST_MODIFIED),
    }
}

fn from_head(headers: &HeaderMap, url: &Url) -> DownloadInfo {
    let mut info = common_fields(headers, url);
    info.content_length = header_string(headers, CONTENT_LENGTH)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|len| *len >= 0)
        .unwrap_or(-1);
    info.supports_partial_content = header_string(headers, ACCEPT_RANGES)
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    info
}

fn from_ranged_get(status: StatusCode, headers: &HeaderMap, url: &Url) -> DownloadInfo {
    let mut info = common_fields(headers, url);
    if status == StatusCode::PARTIAL_CONTENT {
        info.supports_partial_content = true;
        info.content_length = header_string(headers, CONTENT_RANGE)
            .and_then(|v| content_range_total(&v))
            .unwrap_or(-1);
    } else {
        // Full body: the range was ignored, so Content-Length is the whole resource.
        info.content_length = header_string(headers, CONTENT_LENGTH)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1);
    }
    info
}

/// Total size from a `Content-Range: bytes a-b/total` value; `None` for `*`.
fn content_range_total(value: &str) -> Option<i64> {
    let total = value.rsplit_once('/')?.1.trim();
    total.parse::<i64>().ok().filter(|len| *len >= 0)
}
