//! Per-download state owned by the manager registry.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::download::options::DownloadOptions;
use crate::download::progress::{DownloadProgress, DownloadStatus};
use crate::download::segment::{DownloadSegment, SharedSegment};

/// Transfer clock that excludes paused time.
#[derive(Debug, Default)]
pub(super) struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    pub(super) fn with_elapsed(elapsed: Duration) -> Self {
        Self {
            accumulated: elapsed,
            running_since: None,
        }
    }

    pub(super) fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub(super) fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub(super) fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

/// Mutable fields guarded by the task lock.
#[derive(Debug)]
pub(super) struct TaskState {
    pub(super) paused: bool,
    /// Cancelled and replaced on every pause so in-flight requests stop.
    pub(super) pause_scope: CancellationToken,
    pub(super) progress: DownloadProgress,
    pub(super) stopwatch: Stopwatch,
    /// Set once the transfer phase begins.
    pub(super) started: bool,
    /// Destination after the server-suggested name has been applied.
    pub(super) destination: PathBuf,
}

/// One active download.
#[derive(Debug)]
pub(super) struct DownloadTask {
    pub(super) id: String,
    pub(super) options: DownloadOptions,
    /// Overall cancellation; parent of every pause scope.
    pub(super) cancel: CancellationToken,
    state: Mutex<TaskState>,
    segments: Mutex<Vec<SharedSegment>>,
    session_bytes: AtomicU64,
}

impl DownloadTask {
    pub(super) fn new(
        id: String,
        options: DownloadOptions,
        parent: &CancellationToken,
        progress: DownloadProgress,
        stopwatch: Stopwatch,
        paused: bool,
    ) -> Self {
        let cancel = parent.child_token();
        let state = TaskState {
            paused,
            pause_scope: cancel.child_token(),
            progress,
            stopwatch,
            started: false,
            destination: options.file_path.clone(),
        };
        Self {
            id,
            options,
            cancel,
            state: Mutex::new(state),
            segments: Mutex::new(Vec::new()),
            session_bytes: AtomicU64::new(0),
        }
    }

    pub(super) fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn segment_list(&self) -> MutexGuard<'_, Vec<SharedSegment>> {
        self.segments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn set_segments(&self, segments: Vec<SharedSegment>) {
        *self.segment_list() = segments;
    }

    pub(super) fn segments(&self) -> Vec<DownloadSegment> {
        self.segment_list()
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    pub(super) fn record_bytes(&self, n: u64) {
        self.session_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(super) fn session_bytes(&self) -> u64 {
        self.session_bytes.load(Ordering::Relaxed)
    }

    pub(super) fn snapshot(&self) -> DownloadProgress {
        self.state().progress.clone()
    }

    pub(super) fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Current pause scope, or `None` while paused.
    pub(super) fn active_scope(&self) -> Option<CancellationToken> {
        let state = self.state();
        (!state.paused).then(|| state.pause_scope.clone())
    }

    /// Sets the status unless the download already reached a terminal state.
    pub(super) fn set_status(&self, status: DownloadStatus) {
        let mut state = self.state();
        if !state.progress.status.is_terminal() {
            state.progress.status = status;
            state.progress.last_updated = Utc::now();
        }
    }

    /// Enters the transfer phase: Downloading, clock running.
    pub(super) fn begin_transfer(&self) {
        let mut state = self.state();
        state.started = true;
        state.stopwatch.start();
        if !state.progress.status.is_terminal() {
            state.progress.status = DownloadStatus::Downloading;
            state.progress.last_updated = Utc::now();
        }
    }

    /// Suspends the download and hands the Paused snapshot to `notify`
    /// while the task lock is still held, so no older snapshot can be
    /// published after it. Returns false when the download is merging or
    /// already finished.
    pub(super) fn pause(&self, notify: impl FnOnce(&DownloadProgress)) -> bool {
        let mut state = self.state();
        let status = state.progress.status;
        if status.is_terminal() || status == DownloadStatus::Merging {
            return false;
        }
        state.paused = true;
        state.progress.status = DownloadStatus::Paused;
        state.pause_scope.cancel();
        state.pause_scope = self.cancel.child_token();
        state.stopwatch.stop();
        state.progress.elapsed = state.stopwatch.elapsed();
        state.progress.last_updated = Utc::now();
        notify(&state.progress);
        true
    }

    /// Clears the pause flag, notifying under the lock like [`Self::pause`].
    /// Returns false when the download already finished.
    pub(super) fn resume(&self, notify: impl FnOnce(&DownloadProgress)) -> bool {
        let mut state = self.state();
        if state.progress.status.is_terminal() {
            return false;
        }
        state.paused = false;
        if state.progress.status == DownloadStatus::Paused {
            state.progress.status = if state.started {
                DownloadStatus::Downloading
            } else {
                DownloadStatus::Pending
            };
        }
        if state.started {
            state.stopwatch.start();
        }
        state.progress.last_updated = Utc::now();
        notify(&state.progress);
        true
    }

    /// Cancels the download and reports Cancelled right away.
    pub(super) fn cancel(&self) {
        self.cancel.cancel();
        self.set_status(DownloadStatus::Cancelled);
    }

    /// Recomputes byte totals, rate and ETA from the segments.
    ///
    /// Downloaded bytes only ever grow here; paused downloads keep their
    /// Paused status. `notify` sees the new snapshot before the lock is
    /// released.
    pub(super) fn refresh(&self, notify: impl FnOnce(&DownloadProgress)) -> DownloadProgress {
        let segments = self.segments();
        let on_disk: u64 = segments.iter().map(|s| s.downloaded_bytes).sum();
        let active = segments
            .iter()
            .filter(|s| s.status == DownloadStatus::Downloading)
            .count();

        let mut state = self.state();
        let elapsed = state.stopwatch.elapsed();
        let progress = &mut state.progress;
        progress.downloaded_bytes = progress.downloaded_bytes.max(on_disk);
        progress.active_segments = active;
        progress.elapsed = elapsed;
        progress.recompute_rates();
        progress.last_updated = Utc::now();
        if state.paused && !state.progress.status.is_terminal() {
            state.progress.status = DownloadStatus::Paused;
        }
        notify(&state.progress);
        state.progress.clone()
    }

    /// Marks the download finished with `status`, stopping the clock.
    ///
    /// A download already reported Cancelled stays Cancelled. A completed
    /// download whose length was unknown takes its final byte count as the
    /// total.
    pub(super) fn finish(
        &self,
        status: DownloadStatus,
        downloaded: Option<u64>,
        error: Option<String>,
    ) -> DownloadProgress {
        let mut state = self.state();
        state.stopwatch.stop();
        let elapsed = state.stopwatch.elapsed();
        let progress = &mut state.progress;
        if let Some(bytes) = downloaded {
            progress.downloaded_bytes = bytes;
        }
        if status == DownloadStatus::Completed
            && progress.status != DownloadStatus::Cancelled
            && progress.total_bytes <= 0
        {
            progress.total_bytes = i64::try_from(progress.downloaded_bytes).unwrap_or(i64::MAX);
        }
        progress.elapsed = elapsed;
        progress.active_segments = 0;
        progress.recompute_rates();
        progress.last_updated = Utc::now();
        if progress.status != DownloadStatus::Cancelled {
            progress.status = status;
            progress.error_message = error;
        }
        if status == DownloadStatus::Completed {
            progress.estimated_remaining = Some(Duration::ZERO);
        }
        progress.clone()
    }
}
