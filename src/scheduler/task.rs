//! Scheduled task and scheduled download records.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::download::DownloadOptions;

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskStatus {
    /// Waiting for its start time.
    #[default]
    Scheduled,
    /// Executing its downloads.
    Running,
    /// Every download completed (or was removed/cancelled).
    Completed,
    /// At least one download failed.
    Failed,
    /// Stopped explicitly or by its end time.
    Stopped,
    /// Removed from the scheduler.
    Cancelled,
}

impl ScheduledTaskStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal tasks are only run again through an explicit start.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Cancelled
        )
    }
}

impl fmt::Display for ScheduledTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one download inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledDownloadStatus {
    /// Waiting for its task to run.
    #[default]
    Scheduled,
    /// Handed to the download manager.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by a stop or by the manager.
    Cancelled,
    /// Removed from its task.
    Removed,
}

impl ScheduledDownloadStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ScheduledDownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One download owned by a scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledDownload {
    /// Scheduler-side identifier.
    pub id: String,
    /// Resource URL.
    pub url: String,
    /// Destination path.
    pub file_path: PathBuf,
    /// Options handed to the download manager.
    pub options: DownloadOptions,
    /// Current status.
    pub status: ScheduledDownloadStatus,
    /// Download manager id once started.
    pub download_id: Option<String>,
    /// Failure message.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScheduledDownload {
    pub(crate) fn new(options: DownloadOptions) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            url: options.url.clone(),
            file_path: options.file_path.clone(),
            options,
            status: ScheduledDownloadStatus::Scheduled,
            download_id: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A named group of downloads bound to a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Identifier.
    pub id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Earliest time the task may run.
    pub start_time: DateTime<Utc>,
    /// Time after which a running task is stopped.
    pub end_time: Option<DateTime<Utc>>,
    /// Download concurrency for this task; scheduler default when `None`.
    pub max_concurrent_downloads: Option<usize>,
    /// Per-task enable switch.
    pub is_enabled: bool,
    /// True while an execution is in flight.
    pub is_running: bool,
    /// Current status.
    pub status: ScheduledTaskStatus,
    /// Downloads in insertion order.
    pub downloads: Vec<ScheduledDownload>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start of the most recent run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Failure message of the last run.
    pub error_message: Option<String>,
}

impl ScheduledTask {
    pub(crate) fn new(
        name: Option<String>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        max_concurrent_downloads: Option<usize>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            name,
            start_time,
            end_time,
            max_concurrent_downloads,
            is_enabled: true,
            is_running: false,
            status: ScheduledTaskStatus::Scheduled,
            downloads: Vec::new(),
            created_at: Utc::now(),
            last_run_at: None,
            error_message: None,
        }
    }

    /// Enabled, not terminal, and `now` inside `[start_time, end_time]`.
    #[must_use]
    pub fn should_run_at(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled
            && !self.status.is_terminal()
            && now >= self.start_time
            && self.end_time.is_none_or(|end| now <= end)
    }

    /// True once `now` is past `end_time`.
    #[must_use]
    pub fn should_stop_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| now > end)
    }

    /// [`should_run_at`](Self::should_run_at) with the current time.
    #[must_use]
    pub fn should_run(&self) -> bool {
        self.should_run_at(Utc::now())
    }

    /// [`should_stop_at`](Self::should_stop_at) with the current time.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.should_stop_at(Utc::now())
    }

    /// Display name, falling back to "Unnamed".
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }

    pub(crate) fn download_mut(&mut self, download_id: &str) -> Option<&mut ScheduledDownload> {
        self.downloads.iter_mut().find(|d| d.id == download_id)
    }
}
