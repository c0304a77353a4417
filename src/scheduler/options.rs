//! Scheduler settings.

use std::time::Duration;

use crate::download::DEFAULT_MAX_CONCURRENT_DOWNLOADS;

/// Default interval of the scheduling loop.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval at which a running scheduled download is polled.
pub const DEFAULT_DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a completed task is kept before auto-removal.
pub const DEFAULT_COMPLETED_TASK_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Settings for a [`TaskScheduler`](super::TaskScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Initial value of the global enable switch.
    pub is_globally_enabled: bool,
    /// Per-task download concurrency when a task sets none.
    pub default_max_concurrent_downloads: usize,
    /// Interval of the scheduling loop.
    pub check_interval: Duration,
    /// Interval at which running downloads are polled for a terminal status.
    pub download_poll_interval: Duration,
    /// Drop completed downloads from their task.
    pub auto_remove_completed_downloads: bool,
    /// Drop completed tasks once `completed_task_retention` has passed since their last run.
    pub auto_remove_completed_tasks: bool,
    /// Retention for completed tasks when auto-removal is on.
    pub completed_task_retention: Duration,
    /// Capacity of the scheduler event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            is_globally_enabled: true,
            default_max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            check_interval: DEFAULT_CHECK_INTERVAL,
            download_poll_interval: DEFAULT_DOWNLOAD_POLL_INTERVAL,
            auto_remove_completed_downloads: false,
            auto_remove_completed_tasks: false,
            completed_task_retention: DEFAULT_COMPLETED_TASK_RETENTION,
            event_capacity: 256,
        }
    }
}
