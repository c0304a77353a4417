//! rangeget Library
//!
//! Segmented HTTP(S) downloads with pause/resume, resume across restarts,
//! per-segment retry and time-window scheduling of download groups.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Probe, segment workers, merger and the download manager
//! - [`scheduler`] - Scheduled tasks that run groups of downloads
//! - [`events`] - Broadcast event bus shared by both

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod events;
pub mod scheduler;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use download::{
    DownloadError, DownloadManager, DownloadManagerOptions, DownloadOptions, DownloadProgress,
    DownloadStatus, DownloadSummary,
};
pub use events::{DownloadEvent, EventBus};
pub use scheduler::{
    ScheduledDownload, ScheduledTask, SchedulerError, SchedulerEvent, SchedulerOptions,
    TaskScheduler,
};
