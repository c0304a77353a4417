//! Per-download request options and manager-wide settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::DownloadError;
use super::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_CONCURRENT_DOWNLOADS,
    DEFAULT_MAX_SEGMENTS, DEFAULT_PROGRESS_INTERVAL, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
    DEFAULT_TIMEOUT, MAX_SEGMENTS, MIN_SEGMENTS,
};

/// Proxy the HTTP client should route through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional proxy user.
    pub username: Option<String>,
    /// Optional proxy password (only used together with `username`).
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Returns the proxy URL in `http://host:port` form.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Authentication attached to every request of a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Basic base64(user:pass)`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Bearer token.
        token: String,
    },
    /// API key sent in a named header.
    ApiKey {
        /// Header carrying the key.
        header_name: String,
        /// The key itself.
        key: String,
    },
    /// Arbitrary header/value pair.
    Custom {
        /// Header name.
        header_name: String,
        /// Header value.
        value: String,
    },
}

/// Immutable request for one download. Read-only to the engine once started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Absolute http(s) URL of the resource.
    pub url: String,
    /// Destination path. A path ending in a separator means "directory,
    /// name the file from the server".
    pub file_path: PathBuf,
    /// Upper bound on concurrent byte-range segments (1..=16).
    pub max_segments: u32,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first failed attempt of a segment.
    pub retry_attempts: u32,
    /// Delay between segment retry attempts.
    pub retry_delay: Duration,
    /// Replace an existing destination file.
    pub overwrite_existing: bool,
    /// Continue from partial data already on disk.
    pub enable_resume: bool,
    /// Optional proxy.
    pub proxy: Option<ProxyConfig>,
    /// Optional authentication.
    pub auth: Option<AuthConfig>,
}

impl DownloadOptions {
    /// Creates options with default tuning for `url` saved to `file_path`.
    pub fn new(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            file_path: file_path.into(),
            max_segments: DEFAULT_MAX_SEGMENTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            overwrite_existing: false,
            enable_resume: true,
            proxy: None,
            auth: None,
        }
    }

    /// Sets the maximum number of segments.
    #[must_use]
    pub fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.max_segments = max_segments;
        self
    }

    /// Sets the retry budget and the delay between attempts.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Allows replacing an existing destination file.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    /// Enables or disables resuming from partial data.
    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.enable_resume = resume;
        self
    }

    /// Routes requests through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Attaches authentication to every request.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validates the options before a download is registered.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] for an empty URL or path, a
    /// segment count outside 1..=16 or a zero buffer, and
    /// [`DownloadError::InvalidUrl`] when the URL is not an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::invalid_options("URL cannot be empty"));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(DownloadError::invalid_options("file path cannot be empty"));
        }
        if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&self.max_segments) {
            return Err(DownloadError::invalid_options(format!(
                "max_segments must be between {MIN_SEGMENTS} and {MAX_SEGMENTS}, got {}",
                self.max_segments
            )));
        }
        if self.buffer_size == 0 {
            return Err(DownloadError::invalid_options(
                "buffer_size must be greater than zero",
            ));
        }

        let parsed = Url::parse(&self.url).map_err(|_| DownloadError::invalid_url(&self.url))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(DownloadError::invalid_url(&self.url));
        }
        Ok(())
    }
}

/// Settings shared by every download of one [`DownloadManager`](super::DownloadManager).
#[derive(Debug, Clone)]
pub struct DownloadManagerOptions {
    /// Downloads allowed in their transfer phase at the same time.
    pub max_concurrent_downloads: usize,
    /// Directory for segment temp files.
    pub temp_directory: PathBuf,
    /// Interval of the progress ticker.
    pub progress_report_interval: Duration,
    /// Delete segment temp files after a successful merge.
    pub cleanup_temp_files_on_success: bool,
    /// Delete segment temp files when a download fails.
    pub cleanup_temp_files_on_failure: bool,
    /// Delete segment temp files when a download is cancelled. Off by
    /// default so a cancelled download can be restored later.
    pub cleanup_temp_files_on_cancel: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for DownloadManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            temp_directory: std::env::temp_dir(),
            progress_report_interval: DEFAULT_PROGRESS_INTERVAL,
            cleanup_temp_files_on_success: true,
            cleanup_temp_files_on_failure: false,
            cleanup_temp_files_on_cancel: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
