//! Download manager: registry, state machine, segment fan-out and events.
//!
//! # Concurrency Model
//!
//! - Each download runs in its own Tokio task
//! - A global semaphore permit is held for the whole transfer phase
//! - Segments of one download run concurrently in a [`JoinSet`], uncapped
//! - Pausing cancels the download's current pause scope, which interrupts
//!   in-flight requests without touching the overall cancellation token
//! - A ticker task refreshes progress and emits `ProgressChanged`

mod task;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use self::task::{DownloadTask, Stopwatch};
use super::DownloadError;
use super::client::HttpClientFactory;
use super::constants::{FALLBACK_FILE_NAME, PAUSE_POLL_INTERVAL};
use super::info::DownloadInfoProvider;
use super::merger::FileMerger;
use super::options::{DownloadManagerOptions, DownloadOptions};
use super::progress::{DownloadProgress, DownloadStatus, DownloadSummary};
use super::segment::{
    DownloadSegment, SegmentDownloader, SharedSegment, plan_segments, single_stream_segment,
};
use crate::events::{DownloadEvent, EventBus};

/// Runs segmented downloads with pause, resume and cancel.
///
/// Must be created inside a Tokio runtime (the progress ticker is spawned
/// immediately). Dropping the manager cancels every active download.
#[derive(Debug)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    options: DownloadManagerOptions,
    client_factory: HttpClientFactory,
    info_provider: DownloadInfoProvider,
    merger: FileMerger,
    downloads: DashMap<String, Arc<DownloadTask>>,
    semaphore: Arc<Semaphore>,
    events: EventBus<DownloadEvent>,
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Creates a manager and starts its progress ticker.
    #[must_use]
    pub fn new(options: DownloadManagerOptions) -> Self {
        let client_factory = HttpClientFactory::new();
        let max_concurrent = options.max_concurrent_downloads.max(1);
        debug!(
            max_concurrent,
            temp_dir = %options.temp_directory.display(),
            "creating download manager"
        );

        let inner = Arc::new(ManagerInner {
            events: EventBus::new(options.event_capacity),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            client_factory,
            info_provider: DownloadInfoProvider::new(client_factory),
            merger: FileMerger::new(),
            downloads: DashMap::new(),
            shutdown: CancellationToken::new(),
            options,
        });
        tokio::spawn(run_ticker(Arc::clone(&inner)));
        Self { inner }
    }

    /// Registers a download and starts it in the background.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] or
    /// [`DownloadError::InvalidUrl`] when `options` fail validation. Every
    /// later failure is reported through the download's status instead.
    #[instrument(skip(self, options), fields(url = %options.url))]
    pub fn start_download(&self, options: DownloadOptions) -> Result<String, DownloadError> {
        options.validate()?;
        let id = new_download_id();
        let progress = DownloadProgress::new(&id, requested_file_name(&options.file_path));
        self.register(id, options, progress, Stopwatch::default(), false)
    }

    /// Reattaches a download persisted by an earlier process.
    ///
    /// The task is seeded from `saved` (totals and elapsed time) and starts
    /// Paused: it takes its concurrency slot but transfers nothing until
    /// [`resume_download`](Self::resume_download) is called.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad options, or
    /// [`DownloadError::InvalidOptions`] if `download_id` is already active.
    #[instrument(skip(self, options, saved), fields(url = %options.url))]
    pub fn restore_download(
        &self,
        download_id: Option<String>,
        options: DownloadOptions,
        saved: &DownloadProgress,
    ) -> Result<String, DownloadError> {
        options.validate()?;
        let id = download_id.unwrap_or_else(new_download_id);
        if self.inner.downloads.contains_key(&id) {
            return Err(DownloadError::invalid_options(format!(
                "download {id} is already active"
            )));
        }

        let mut progress = DownloadProgress::new(&id, saved.file_name.clone());
        if progress.file_name.is_empty() {
            progress.file_name = requested_file_name(&options.file_path);
        }
        progress.total_bytes = saved.total_bytes;
        progress.downloaded_bytes = saved.downloaded_bytes;
        progress.elapsed = saved.elapsed;
        progress.status = DownloadStatus::Paused;
        progress.recompute_rates();

        info!(
            download_id = %id,
            downloaded = saved.downloaded_bytes,
            total = saved.total_bytes,
            "restoring download in paused state"
        );
        self.register(
            id,
            options,
            progress,
            Stopwatch::with_elapsed(saved.elapsed),
            true,
        )
    }

    fn register(
        &self,
        id: String,
        options: DownloadOptions,
        progress: DownloadProgress,
        stopwatch: Stopwatch,
        paused: bool,
    ) -> Result<String, DownloadError> {
        let task = Arc::new(DownloadTask::new(
            id.clone(),
            options,
            &self.inner.shutdown,
            progress,
            stopwatch,
            paused,
        ));
        self.inner.downloads.insert(id.clone(), Arc::clone(&task));
        debug!(download_id = %id, "download registered");

        tokio::spawn(run_download(Arc::clone(&self.inner), task));
        Ok(id)
    }

    /// Pauses a download, interrupting in-flight segment requests.
    ///
    /// Returns false if the id is unknown or the download can no longer be
    /// paused (merging or finished).
    pub fn pause_download(&self, download_id: &str) -> bool {
        let Some(task) = self.task(download_id) else {
            return false;
        };
        let events = &self.inner.events;
        let changed = task.pause(|snapshot| {
            events.publish(DownloadEvent::ProgressChanged(snapshot.clone()));
        });
        if changed {
            info!(download_id, "download paused");
        }
        changed
    }

    /// Resumes a paused download. Returns false if the id is unknown.
    pub fn resume_download(&self, download_id: &str) -> bool {
        let Some(task) = self.task(download_id) else {
            return false;
        };
        let events = &self.inner.events;
        let changed = task.resume(|snapshot| {
            events.publish(DownloadEvent::ProgressChanged(snapshot.clone()));
        });
        if changed {
            info!(download_id, "download resumed");
        }
        changed
    }

    /// Requests cancellation. Returns immediately; workers observe the token
    /// and the download leaves the registry shortly after.
    pub fn cancel_download(&self, download_id: &str) -> bool {
        let Some(task) = self.task(download_id) else {
            return false;
        };
        info!(download_id, "download cancellation requested");
        task.cancel();
        true
    }

    /// Snapshot of one active download.
    #[must_use]
    pub fn get_progress(&self, download_id: &str) -> Option<DownloadProgress> {
        self.task(download_id).map(|task| task.snapshot())
    }

    /// Snapshots of every active download.
    #[must_use]
    pub fn get_all_progress(&self) -> Vec<DownloadProgress> {
        self.inner
            .downloads
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    /// Copies of the segments of an active download; empty if unknown or not
    /// yet planned.
    #[must_use]
    pub fn get_segments(&self, download_id: &str) -> Vec<DownloadSegment> {
        self.task(download_id)
            .map(|task| task.segments())
            .unwrap_or_default()
    }

    /// Aggregate over all active downloads.
    #[must_use]
    pub fn summary(&self) -> DownloadSummary {
        DownloadSummary::from_progress(&self.get_all_progress())
    }

    /// Number of downloads in the registry.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.downloads.len()
    }

    /// Subscribes to download events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until `download_id` reaches a terminal state.
    ///
    /// Returns the terminal snapshot, or `None` if the id is not active (or
    /// finished before its terminal event could be observed).
    pub async fn wait_for_completion(&self, download_id: &str) -> Option<DownloadProgress> {
        let rx = self.subscribe();
        if !self.inner.downloads.contains_key(download_id) {
            return None;
        }
        self.wait_on(rx, download_id).await
    }

    /// Starts a download and waits for its terminal snapshot.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad options, or
    /// [`DownloadError::Cancelled`] if the manager shuts down first.
    pub async fn download_and_wait(
        &self,
        options: DownloadOptions,
    ) -> Result<DownloadProgress, DownloadError> {
        let rx = self.subscribe();
        let id = self.start_download(options)?;
        self.wait_on(rx, &id).await.ok_or(DownloadError::Cancelled)
    }

    async fn wait_on(
        &self,
        mut rx: broadcast::Receiver<DownloadEvent>,
        download_id: &str,
    ) -> Option<DownloadProgress> {
        let mut poll = tokio::time::interval(PAUSE_POLL_INTERVAL);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) if event.download_id() == download_id && event.is_terminal() => {
                        return Some(event.progress().clone());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = poll.tick() => {
                    if !self.inner.downloads.contains_key(download_id) {
                        return None;
                    }
                }
            }
        }
    }

    /// Stops the progress ticker and cancels every active download.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(active = self.inner.downloads.len(), "shutting down download manager");
            self.inner.shutdown.cancel();
        }
    }

    fn task(&self, download_id: &str) -> Option<Arc<DownloadTask>> {
        self.inner
            .downloads
            .get(download_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn new_download_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn requested_file_name(path: &Path) -> String {
    if has_directory_hint(path) {
        return String::new();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_directory_hint(path: &Path) -> bool {
    let raw = path.as_os_str().to_string_lossy();
    raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR)
}

/// Destination after applying the server-suggested name to a directory path.
async fn resolve_destination(requested: &Path, suggested: Option<&str>) -> PathBuf {
    let is_dir = has_directory_hint(requested)
        || tokio::fs::metadata(requested)
            .await
            .is_ok_and(|meta| meta.is_dir());
    if is_dir {
        requested.join(suggested.unwrap_or(FALLBACK_FILE_NAME))
    } else {
        requested.to_path_buf()
    }
}

async fn run_ticker(inner: Arc<ManagerInner>) {
    let mut interval = tokio::time::interval(inner.options.progress_report_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let tasks: Vec<Arc<DownloadTask>> = inner
            .downloads
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for task in tasks {
            // Published under the task lock so a concurrent pause cannot be
            // overtaken by this older snapshot.
            task.refresh(|snapshot| {
                if !snapshot.status.is_terminal() {
                    inner
                        .events
                        .publish(DownloadEvent::ProgressChanged(snapshot.clone()));
                }
            });
        }
    }
    debug!("progress ticker stopped");
}

async fn run_download(inner: Arc<ManagerInner>, task: Arc<DownloadTask>) {
    let permit = tokio::select! {
        () = task.cancel.cancelled() => Err(DownloadError::Cancelled),
        permit = Arc::clone(&inner.semaphore).acquire_owned() => {
            permit.map_err(|_| DownloadError::Cancelled)
        }
    };

    let result = match permit {
        Ok(permit) => {
            // Permit is dropped when this block exits (RAII)
            let _permit = permit;
            inner.execute(&task).await
        }
        Err(e) => Err(e),
    };

    inner.complete(&task, result).await;
}

impl ManagerInner {
    #[instrument(skip_all, fields(download_id = %task.id, url = %task.options.url))]
    async fn execute(&self, task: &Arc<DownloadTask>) -> Result<u64, DownloadError> {
        wait_while_paused(task).await?;
        task.begin_transfer();

        let options = &task.options;
        let info = self
            .info_provider
            .probe(&options.url, options, &task.cancel)
            .await?;

        let destination =
            resolve_destination(&options.file_path, info.file_name.as_deref()).await;
        {
            let mut state = task.state();
            if state.progress.total_bytes <= 0 {
                state.progress.total_bytes = info.content_length;
            }
            if let Some(name) = destination.file_name() {
                state.progress.file_name = name.to_string_lossy().into_owned();
            }
            state.destination.clone_from(&destination);
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        if tokio::fs::try_exists(&destination).await.unwrap_or(false)
            && !options.overwrite_existing
            && !options.enable_resume
        {
            return Err(DownloadError::conflict(&destination));
        }

        let known_length = info.known_length();
        let segmented =
            info.supports_partial_content && known_length.is_some() && options.max_segments > 1;

        let client = self.client_factory.create_client(options)?;
        let downloader = Arc::new(SegmentDownloader::new(client));

        match known_length {
            Some(length) if segmented => {
                self.run_segmented(task, &downloader, length, &destination)
                    .await
            }
            _ => {
                self.run_single_stream(task, &downloader, known_length, &destination)
                    .await
            }
        }
    }

    async fn run_segmented(
        &self,
        task: &Arc<DownloadTask>,
        downloader: &Arc<SegmentDownloader>,
        length: u64,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let temp_dir = &self.options.temp_directory;
        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| DownloadError::io(temp_dir, e))?;

        let mut planned = plan_segments(&task.id, length, task.options.max_segments, temp_dir);
        if task.options.enable_resume {
            for segment in &mut planned {
                segment.adopt_existing_file().await?;
            }
        }
        info!(
            segments = planned.len(),
            resumed_bytes = planned.iter().map(|s| s.downloaded_bytes).sum::<u64>(),
            "starting segmented transfer"
        );

        let paths: Vec<PathBuf> = planned.iter().map(|s| s.temp_file_path.clone()).collect();
        let shared: Vec<SharedSegment> = planned
            .into_iter()
            .map(|s| Arc::new(Mutex::new(s)))
            .collect();
        task.set_segments(shared.clone());

        run_workers(task, downloader, shared).await?;

        if task.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        task.set_status(DownloadStatus::Merging);
        let total = self
            .merger
            .merge(&paths, destination, &task.cancel)
            .await?;

        if self.options.cleanup_temp_files_on_success {
            remove_files(&paths).await;
        }
        Ok(total)
    }

    async fn run_single_stream(
        &self,
        task: &Arc<DownloadTask>,
        downloader: &Arc<SegmentDownloader>,
        length: Option<u64>,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let mut segment = single_stream_segment(&task.id, destination, length);
        // An overwrite starts from zero; the first attempt truncates the file.
        if task.options.enable_resume && !task.options.overwrite_existing {
            segment.adopt_existing_file().await?;
        }
        info!(
            resumed_bytes = segment.downloaded_bytes,
            known_length = length.is_some(),
            "starting single-stream transfer"
        );

        let shared = Arc::new(Mutex::new(segment));
        task.set_segments(vec![Arc::clone(&shared)]);
        run_workers(task, downloader, vec![Arc::clone(&shared)]).await?;

        if task.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let written = shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .downloaded_bytes;
        Ok(written)
    }

    async fn complete(&self, task: &Arc<DownloadTask>, result: Result<u64, DownloadError>) {
        match result {
            Ok(total) => {
                let snapshot = task.finish(DownloadStatus::Completed, Some(total), None);
                if snapshot.status == DownloadStatus::Completed {
                    info!(
                        download_id = %task.id,
                        bytes = total,
                        session_bytes = task.session_bytes(),
                        elapsed_ms = snapshot.elapsed.as_millis(),
                        "download completed"
                    );
                    self.events.publish(DownloadEvent::DownloadCompleted(snapshot));
                } else {
                    self.events.publish(DownloadEvent::ProgressChanged(snapshot));
                }
            }
            Err(e) if e.is_cancelled() || task.cancel.is_cancelled() => {
                let snapshot = task.finish(DownloadStatus::Cancelled, None, None);
                info!(download_id = %task.id, "download cancelled");
                if self.options.cleanup_temp_files_on_cancel {
                    remove_temp_files(task).await;
                }
                self.events.publish(DownloadEvent::ProgressChanged(snapshot));
            }
            Err(e) => {
                warn!(download_id = %task.id, url = %task.options.url, error = %e, "download failed");
                let snapshot = task.finish(DownloadStatus::Failed, None, Some(e.to_string()));
                self.events.publish(DownloadEvent::DownloadFailed(snapshot));
                if self.options.cleanup_temp_files_on_failure {
                    remove_temp_files(task).await;
                }
            }
        }
        self.downloads.remove(&task.id);
        debug!(download_id = %task.id, "download removed from registry");
    }
}

/// Blocks while the download is paused (restored downloads start here).
async fn wait_while_paused(task: &DownloadTask) -> Result<(), DownloadError> {
    while task.is_paused() {
        tokio::select! {
            () = task.cancel.cancelled() => return Err(DownloadError::Cancelled),
            () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
        }
    }
    if task.cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    Ok(())
}

/// Runs one worker per unfinished segment; the first failure aborts the rest.
async fn run_workers(
    task: &Arc<DownloadTask>,
    downloader: &Arc<SegmentDownloader>,
    segments: Vec<SharedSegment>,
) -> Result<(), DownloadError> {
    let mut workers = JoinSet::new();
    for segment in segments {
        let done = segment
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_complete();
        if done {
            continue;
        }
        workers.spawn(segment_worker(
            Arc::clone(task),
            Arc::clone(downloader),
            segment,
        ));
    }

    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(DownloadError::worker(e.to_string())));
        if let Err(e) = outcome {
            failure = Some(e);
            workers.abort_all();
            break;
        }
    }
    // Let aborted workers unwind before temp files are touched.
    while workers.join_next().await.is_some() {}

    failure.map_or(Ok(()), Err)
}

async fn segment_worker(
    task: Arc<DownloadTask>,
    downloader: Arc<SegmentDownloader>,
    segment: SharedSegment,
) -> Result<(), DownloadError> {
    let on_bytes = |n: u64| task.record_bytes(n);
    loop {
        if task.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let Some(scope) = task.active_scope() else {
            set_segment_status(&segment, DownloadStatus::Paused);
            tokio::select! {
                () = task.cancel.cancelled() => return Err(DownloadError::Cancelled),
                () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
            }
            continue;
        };

        match downloader
            .download_segment(&segment, &task.options, &on_bytes, &scope)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if e.is_cancelled() => {
                if task.cancel.is_cancelled() {
                    return Err(e);
                }
                set_segment_status(&segment, DownloadStatus::Paused);
            }
            Err(e) => return Err(e),
        }
    }
}

fn set_segment_status(segment: &SharedSegment, status: DownloadStatus) {
    segment
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .status = status;
}

/// Removes segment temp files; a single-stream download writes straight to
/// its destination, which is left alone.
async fn remove_temp_files(task: &DownloadTask) {
    let destination = task.state().destination.clone();
    let temp: Vec<PathBuf> = task
        .segments()
        .into_iter()
        .map(|s| s.temp_file_path)
        .filter(|p| *p != destination)
        .collect();
    remove_files(&temp).await;
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_ids_are_unique_simple_uuids() {
        let a = new_download_id();
        let b = new_download_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_requested_file_name() {
        assert_eq!(requested_file_name(Path::new("/tmp/out.iso")), "out.iso");
        assert_eq!(requested_file_name(Path::new("/tmp/downloads/")), "");
    }

    #[tokio::test]
    async fn test_resolve_destination_uses_suggested_name_for_directories() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_destination(dir.path(), Some("server.bin")).await;
        assert_eq!(resolved, dir.path().join("server.bin"));

        let fallback = resolve_destination(dir.path(), None).await;
        assert_eq!(fallback, dir.path().join(FALLBACK_FILE_NAME));

        let explicit = dir.path().join("mine.bin");
        assert_eq!(
            resolve_destination(&explicit, Some("server.bin")).await,
            explicit
        );
    }

    #[tokio::test]
    async fn test_start_download_rejects_invalid_options_synchronously() {
        let manager = DownloadManager::new(DownloadManagerOptions::default());
        let options = DownloadOptions::new("not a url", "/tmp/x").with_max_segments(4);
        assert!(matches!(
            manager.start_download(options),
            Err(DownloadError::InvalidUrl { .. })
        ));
        let options = DownloadOptions::new("https://example.com/x", "/tmp/x").with_max_segments(17);
        assert!(matches!(
            manager.start_download(options),
            Err(DownloadError::InvalidOptions { .. })
        ));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_misses_not_errors() {
        let manager = DownloadManager::new(DownloadManagerOptions::default());
        assert!(manager.get_progress("nope").is_none());
        assert!(manager.get_segments("nope").is_empty());
        assert!(!manager.pause_download("nope"));
        assert!(!manager.resume_download("nope"));
        assert!(!manager.cancel_download("nope"));
        assert!(manager.wait_for_completion("nope").await.is_none());
        assert_eq!(manager.summary().total_downloads, 0);
    }

    #[tokio::test]
    async fn test_restored_download_waits_paused_then_cancels() {
        let dir = TempDir::new().unwrap();
        let manager = DownloadManager::new(DownloadManagerOptions {
            temp_directory: dir.path().to_path_buf(),
            ..DownloadManagerOptions::default()
        });
        let mut saved = DownloadProgress::new("old", "file.bin");
        saved.total_bytes = 1000;
        saved.downloaded_bytes = 400;

        let options = DownloadOptions::new(
            "http://127.0.0.1:9/file.bin",
            dir.path().join("file.bin"),
        );
        let id = manager
            .restore_download(Some("restored".to_string()), options.clone(), &saved)
            .unwrap();
        assert_eq!(id, "restored");

        let progress = manager.get_progress(&id).unwrap();
        assert_eq!(progress.status, DownloadStatus::Paused);
        assert_eq!(progress.downloaded_bytes, 400);
        assert_eq!(progress.total_bytes, 1000);

        assert!(matches!(
            manager.restore_download(Some("restored".to_string()), options, &saved),
            Err(DownloadError::InvalidOptions { .. })
        ));

        let mut rx = manager.subscribe();
        assert!(manager.cancel_download(&id));
        let terminal = loop {
            let event = rx.recv().await.unwrap();
            if event.download_id() == id && event.is_terminal() {
                break event;
            }
        };
        assert_eq!(terminal.progress().status, DownloadStatus::Cancelled);
        assert!(matches!(terminal, DownloadEvent::ProgressChanged(_)));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(manager.get_progress(&id).is_none());
    }
}
