//! Lifecycle notifications published by the scheduler.

use chrono::{DateTime, Utc};

use super::task::{ScheduledDownload, ScheduledTask};

/// Scheduler lifecycle event. Each variant carries snapshots taken when the
/// event was published.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A task began executing.
    TaskStarted {
        /// Task snapshot.
        task: ScheduledTask,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// Every download of the task finished without failure.
    TaskCompleted {
        /// Task snapshot.
        task: ScheduledTask,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// The task was stopped explicitly or by its end time.
    TaskStopped {
        /// Task snapshot.
        task: ScheduledTask,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// At least one download of the task failed.
    TaskFailed {
        /// Task snapshot.
        task: ScheduledTask,
        /// Failure description.
        error: String,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// A download was handed to the download manager.
    DownloadStarted {
        /// Owning task snapshot.
        task: ScheduledTask,
        /// Download snapshot.
        download: ScheduledDownload,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// A download completed.
    DownloadCompleted {
        /// Owning task snapshot.
        task: ScheduledTask,
        /// Download snapshot.
        download: ScheduledDownload,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
    /// A download failed to start or failed in the manager.
    DownloadFailed {
        /// Owning task snapshot.
        task: ScheduledTask,
        /// Download snapshot.
        download: ScheduledDownload,
        /// Failure description.
        error: String,
        /// Publication time.
        timestamp: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub(crate) fn task_started(task: ScheduledTask) -> Self {
        Self::TaskStarted {
            task,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn task_completed(task: ScheduledTask) -> Self {
        Self::TaskCompleted {
            task,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn task_stopped(task: ScheduledTask) -> Self {
        Self::TaskStopped {
            task,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn task_failed(task: ScheduledTask, error: impl Into<String>) -> Self {
        Self::TaskFailed {
            task,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn download_started(task: ScheduledTask, download: ScheduledDownload) -> Self {
        Self::DownloadStarted {
            task,
            download,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn download_completed(task: ScheduledTask, download: ScheduledDownload) -> Self {
        Self::DownloadCompleted {
            task,
            download,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn download_failed(
        task: ScheduledTask,
        download: ScheduledDownload,
        error: impl Into<String>,
    ) -> Self {
        Self::DownloadFailed {
            task,
            download,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Task snapshot carried by the event.
    #[must_use]
    pub fn task(&self) -> &ScheduledTask {
        match self {
            Self::TaskStarted { task, .. }
            | Self::TaskCompleted { task, .. }
            | Self::TaskStopped { task, .. }
            | Self::TaskFailed { task, .. }
            | Self::DownloadStarted { task, .. }
            | Self::DownloadCompleted { task, .. }
            | Self::DownloadFailed { task, .. } => task,
        }
    }

    /// Download snapshot for download-level events.
    #[must_use]
    pub fn download(&self) -> Option<&ScheduledDownload> {
        match self {
            Self::DownloadStarted { download, .. }
            | Self::DownloadCompleted { download, .. }
            | Self::DownloadFailed { download, .. } => Some(download),
            _ => None,
        }
    }

    /// Publication time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskStarted { timestamp, .. }
            | Self::TaskCompleted { timestamp, .. }
            | Self::TaskStopped { timestamp, .. }
            | Self::TaskFailed { timestamp, .. }
            | Self::DownloadStarted { timestamp, .. }
            | Self::DownloadCompleted { timestamp, .. }
            | Self::DownloadFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Short event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskStopped { .. } => "task_stopped",
            Self::TaskFailed { .. } => "task_failed",
            Self::DownloadStarted { .. } => "download_started",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::DownloadFailed { .. } => "download_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadOptions;

    fn task() -> ScheduledTask {
        ScheduledTask::new(Some("t".to_string()), Utc::now(), None, None)
    }

    #[test]
    fn test_accessors_for_task_events() {
        let task = task();
        let event = SchedulerEvent::task_failed(task.clone(), "boom");
        assert_eq!(event.task().id, task.id);
        assert!(event.download().is_none());
        assert_eq!(event.name(), "task_failed");
        assert!(event.timestamp() >= task.created_at);
    }

    #[test]
    fn test_accessors_for_download_events() {
        let download = ScheduledDownload::new(DownloadOptions::new("https://example.com/a", "/tmp/a"));
        let event = SchedulerEvent::download_completed(task(), download.clone());
        assert_eq!(event.download().map(|d| d.id.as_str()), Some(download.id.as_str()));
        assert_eq!(event.name(), "download_completed");
    }
}
