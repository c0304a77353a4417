//! Time-window task scheduler on top of the download manager.
//!
//! A [`ScheduledTask`] groups downloads with a start time, an optional end
//! time and a concurrency cap. The scheduler's loop starts due tasks and
//! stops tasks past their end time; each run feeds its queued downloads
//! through the [`DownloadManager`](crate::download::DownloadManager) and
//! publishes [`SchedulerEvent`]s.

mod error;
mod events;
mod options;
mod service;
mod task;

pub use error::SchedulerError;
pub use events::SchedulerEvent;
pub use options::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_COMPLETED_TASK_RETENTION, DEFAULT_DOWNLOAD_POLL_INTERVAL,
    SchedulerOptions,
};
pub use service::{SchedulerTick, TaskScheduler, TaskUpdate};
pub use task::{ScheduledDownload, ScheduledDownloadStatus, ScheduledTask, ScheduledTaskStatus};
