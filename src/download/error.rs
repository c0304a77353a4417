//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and for the
//! `error_message` carried by failed progress snapshots.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while probing, transferring or merging a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The supplied [`DownloadOptions`](super::DownloadOptions) are unusable.
    #[error("invalid download options: {reason}")]
    InvalidOptions {
        /// What was wrong with the options.
        reason: String,
    },

    /// The provided URL is malformed or not an absolute http(s) URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The server answered a ranged request with the whole body.
    #[error("server ignored range request starting at byte {offset} for {url}")]
    RangeNotHonored {
        /// The URL that was requested.
        url: String,
        /// First byte that was asked for.
        offset: u64,
    },

    /// The response body ended before the requested range was delivered.
    #[error("connection closed after {received} of {expected} bytes for {url}")]
    Incomplete {
        /// The URL that was requested.
        url: String,
        /// Bytes the range should have delivered.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The destination file exists and neither overwrite nor resume is enabled.
    #[error("file already exists: {path}")]
    Conflict {
        /// The destination that already exists.
        path: PathBuf,
    },

    /// A segment file needed for the merge does not exist.
    #[error("segment file not found: {path}")]
    MissingSegment {
        /// The missing segment file.
        path: PathBuf,
    },

    /// File system error during download (create file, write, rename, etc.)
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A segment worker task panicked or was aborted unexpectedly.
    #[error("segment worker stopped unexpectedly: {reason}")]
    Worker {
        /// Join failure description.
        reason: String,
    },

    /// The operation was cancelled (overall cancel or pause scope).
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an invalid options error.
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a range-not-honored error.
    pub fn range_not_honored(url: impl Into<String>, offset: u64) -> Self {
        Self::RangeNotHonored {
            url: url.into(),
            offset,
        }
    }

    /// Creates an incomplete-body error.
    pub fn incomplete(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::Incomplete {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Creates a destination conflict error.
    pub fn conflict(path: impl Into<PathBuf>) -> Self {
        Self::Conflict { path: path.into() }
    }

    /// Creates a missing segment error.
    pub fn missing_segment(path: impl Into<PathBuf>) -> Self {
        Self::MissingSegment { path: path.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a worker failure error.
    pub fn worker(reason: impl Into<String>) -> Self {
        Self::Worker {
            reason: reason.into(),
        }
    }

    /// Returns true for cancellation, which is a terminal state rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path the source error does not carry.
