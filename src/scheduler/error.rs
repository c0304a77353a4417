//! Errors returned by [`TaskScheduler`](super::TaskScheduler) operations.

use thiserror::Error;

use crate::download::DownloadError;

/// Errors from scheduler operations that mutate tasks.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No task with this id is registered.
    #[error("scheduled task not found: {task_id}")]
    TaskNotFound {
        /// The unknown task id.
        task_id: String,
    },

    /// The task has no download with this id.
    #[error("scheduled download {download_id} not found in task {task_id}")]
    DownloadNotFound {
        /// Task that was searched.
        task_id: String,
        /// The unknown download id.
        download_id: String,
    },

    /// The download is running and cannot be moved.
    #[error("scheduled download {download_id} is running")]
    DownloadRunning {
        /// The running download.
        download_id: String,
    },

    /// The download options were rejected.
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl SchedulerError {
    /// Creates a task-not-found error.
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Creates a download-not-found error.
    pub fn download_not_found(task_id: impl Into<String>, download_id: impl Into<String>) -> Self {
        Self::DownloadNotFound {
            task_id: task_id.into(),
            download_id: download_id.into(),
        }
    }

    /// Creates a download-running error.
    pub fn download_running(download_id: impl Into<String>) -> Self {
        Self::DownloadRunning {
            download_id: download_id.into(),
        }
    }
}
