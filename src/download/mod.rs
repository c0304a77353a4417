//! Segmented HTTP download engine.
//!
//! A download is probed first; if the server supports byte ranges and
//! reports a length, the resource is split into up to `max_segments`
//! ranges that are fetched concurrently into temp files and merged into
//! the destination. Otherwise a single stream writes the destination
//! directly.
//!
//! # Features
//!
//! - Pause/resume that interrupts in-flight requests without losing bytes
//! - Resume across restarts from segment temp files on disk
//! - Per-segment retry with a fixed delay and a bounded budget
//! - Progress snapshots and broadcast events
//!
//! # Example
//!
//! ```no_run
//! use rangeget::download::{DownloadManager, DownloadManagerOptions, DownloadOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(DownloadManagerOptions::default());
//! let options = DownloadOptions::new("https://example.com/big.iso", "./big.iso")
//!     .with_max_segments(8);
//! let progress = manager.download_and_wait(options).await?;
//! println!("{}: {}", progress.file_name, progress.status);
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod filename;
mod info;
mod manager;
mod merger;
mod options;
mod progress;
mod retry;
mod segment;

pub use client::HttpClientFactory;
pub use constants::{
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MAX_SEGMENTS, DEFAULT_RETRY_ATTEMPTS, MAX_SEGMENTS,
    MIN_SEGMENTS,
};
pub use error::DownloadError;
pub use info::{DownloadInfo, DownloadInfoProvider};
pub use manager::DownloadManager;
pub use merger::FileMerger;
pub use options::{AuthConfig, DownloadManagerOptions, DownloadOptions, ProxyConfig};
pub use progress::{DownloadProgress, DownloadStatus, DownloadSummary};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, retry_after_delay};
pub use segment::{
    DownloadSegment, SegmentDownloader, SharedSegment, plan_segments, segment_temp_path,
    single_stream_segment,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
