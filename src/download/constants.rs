//! Constants for the download module (defaults, limits, naming).

use std::time::Duration;

/// Smallest accepted `max_segments`.
pub const MIN_SEGMENTS: u32 = 1;

/// Largest accepted `max_segments`.
pub const MAX_SEGMENTS: u32 = 16;

/// Default number of segments per download.
pub const DEFAULT_MAX_SEGMENTS: u32 = 8;

/// Default copy buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default per-request timeout (5 minutes for large transfers).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout; capped by the request timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default number of downloads allowed in their transfer phase at once.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Default interval between progress ticks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval while a restored download waits for an explicit resume.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Suffix of the transient file written while merging segments.
pub const MERGING_SUFFIX: &str = ".merging";

/// File name used when neither the caller nor the server supplies one.
pub const FALLBACK_FILE_NAME: &str = "download";
