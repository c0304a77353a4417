//! Download status and the progress snapshot exposed to observers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a download (and of each of its segments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Registered, waiting for a concurrency slot.
    #[default]
    Pending,
    /// Transferring bytes.
    Downloading,
    /// Suspended by the caller; resumable.
    Paused,
    /// Concatenating segment files into the destination.
    Merging,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl DownloadStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled are terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of one download.
///
/// This is the only download state handed to observers; it never carries
/// segment lists or cancellation handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Download identifier.
    pub download_id: String,
    /// Destination file name.
    pub file_name: String,
    /// Total size, `-1` when the server did not report one.
    pub total_bytes: i64,
    /// Bytes on disk so far.
    pub downloaded_bytes: u64,
    /// Average transfer rate since the clock started.
    pub bytes_per_second: u64,
    /// Time spent transferring (excludes paused time).
    pub elapsed: Duration,
    /// Remaining time at the current rate; `None` when the rate is zero or the size unknown.
    pub estimated_remaining: Option<Duration>,
    /// Current status.
    pub status: DownloadStatus,
    /// Segments currently transferring.
    pub active_segments: usize,
    /// Failure message once status is Failed.
    pub error_message: Option<String>,
    /// When this snapshot last changed.
    pub last_updated: DateTime<Utc>,
}

impl DownloadProgress {
    /// Creates a Pending snapshot.
    pub fn new(download_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            download_id: download_id.into(),
            file_name: file_name.into(),
            total_bytes: 0,
            downloaded_bytes: 0,
            bytes_per_second: 0,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            status: DownloadStatus::Pending,
            active_segments: 0,
            error_message: None,
            last_updated: Utc::now(),
        }
    }

    /// Percentage in `0.0..=100.0`; zero while the size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage_complete(&self) -> f64 {
        if self.total_bytes > 0 {
            self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Total size when known.
    #[must_use]
    pub fn known_total(&self) -> Option<u64> {
        u64::try_from(self.total_bytes).ok().filter(|total| *total > 0)
    }

    /// Recomputes rate and ETA from `downloaded_bytes` and `elapsed`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub(crate) fn recompute_rates(&mut self) {
        let secs = self.elapsed.as_secs_f64();
        self.bytes_per_second = if secs > 0.0 {
            (self.downloaded_bytes as f64 / secs) as u64
        } else {
            0
        };
        self.estimated_remaining = match self.known_total() {
            Some(total) if self.bytes_per_second > 0 => {
                let remaining = total.saturating_sub(self.downloaded_bytes);
                Some(Duration::from_secs(remaining / self.bytes_per_second))
            }
            _ => None,
        };
    }
}

/// Aggregate over a set of progress snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSummary {
    /// Number of downloads.
    pub total_downloads: usize,
    /// Completed downloads.
    pub completed_downloads: usize,
    /// Downloads currently transferring.
    pub active_downloads: usize,
    /// Paused downloads.
    pub paused_downloads: usize,
    /// Failed downloads.
    pub failed_downloads: usize,
    /// Sum of known sizes.
    pub total_bytes: u64,
    /// Sum of downloaded bytes.
    pub total_downloaded_bytes: u64,
    /// Mean rate across downloads that are moving.
    pub average_speed: f64,
}

impl DownloadSummary {
    /// Builds a summary from snapshots.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_progress(progress: &[DownloadProgress]) -> Self {
        let count = |status: DownloadStatus| progress.iter().filter(|p| p.status == status).count();
        let moving: Vec<u64> = progress
            .iter()
            .map(|p| p.bytes_per_second)
            .filter(|rate| *rate > 0)
            .collect();
        let average_speed = if moving.is_empty() {
            0.0
        } else {
            moving.iter().sum::<u64>() as f64 / moving.len() as f64
        };

        Self {
            total_downloads: progress.len(),
            completed_downloads: count(DownloadStatus::Completed),
            active_downloads: count(DownloadStatus::Downloading),
            paused_downloads: count(DownloadStatus::Paused),
            failed_downloads: count(DownloadStatus::Failed),
            total_bytes: progress.iter().filter_map(DownloadProgress::known_total).sum(),
            total_downloaded_bytes: progress.iter().map(|p| p.downloaded_bytes).sum(),
            average_speed,
        }
    }

    /// Overall percentage across all downloads with a known size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn overall_percentage(&self) -> f64 {
        if self.total_bytes > 0 {
            self.total_downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(!DownloadStatus::Merging.is_terminal());
    }

    #[test]
    fn test_percentage_unknown_size_is_zero() {
        let mut progress = DownloadProgress::new("id", "file");
        progress.total_bytes = -1;
        progress.downloaded_bytes = 500;
        assert!(progress.percentage_complete().abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_and_eta() {
        let mut progress = DownloadProgress::new("id", "file");
        progress.total_bytes = 1000;
        progress.downloaded_bytes = 250;
        progress.elapsed = Duration::from_secs(5);
        progress.recompute_rates();

        assert!((progress.percentage_complete() - 25.0).abs() < f64::EPSILON);
        assert_eq!(progress.bytes_per_second, 50);
        assert_eq!(progress.estimated_remaining, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_eta_omitted_when_rate_is_zero() {
        let mut progress = DownloadProgress::new("id", "file");
        progress.total_bytes = 1000;
        progress.elapsed = Duration::ZERO;
        progress.recompute_rates();
        assert_eq!(progress.bytes_per_second, 0);
        assert_eq!(progress.estimated_remaining, None);
    }

    #[test]
    fn test_summary_counts_by_status() {
        let mut a = DownloadProgress::new("a", "a");
        a.status = DownloadStatus::Completed;
        a.total_bytes = 100;
        a.downloaded_bytes = 100;
        let mut b = DownloadProgress::new("b", "b");
        b.status = DownloadStatus::Downloading;
        b.total_bytes = 300;
        b.downloaded_bytes = 100;
        b.bytes_per_second = 40;
        let mut c = DownloadProgress::new("c", "c");
        c.status = DownloadStatus::Paused;
        c.total_bytes = -1;

        let summary = DownloadSummary::from_progress(&[a, b, c]);
        assert_eq!(summary.total_downloads, 3);
        assert_eq!(summary.completed_downloads, 1);
        assert_eq!(summary.active_downloads, 1);
        assert_eq!(summary.paused_downloads, 1);
        assert_eq!(summary.total_bytes, 400);
        assert_eq!(summary.total_downloaded_bytes, 200);
        assert!((summary.average_speed - 40.0).abs() < f64::EPSILON);
        assert!((summary.overall_percentage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_round_trips_through_json_for_persistence() {
        let mut progress = DownloadProgress::new("abc", "file.iso");
        progress.total_bytes = 2048;
        progress.downloaded_bytes = 1024;
        progress.status = DownloadStatus::Paused;
        let json = serde_json::to_string(&progress).unwrap();
        let restored: DownloadProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, progress);
    }
}
