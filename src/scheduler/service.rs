//! Task scheduler: time windows, per-task concurrency and download tracking.
//!
//! # Concurrency Model
//!
//! - Task records live behind one mutex that is never held across an await
//! - Each run spawns one Tokio task per Scheduled download; a per-task
//!   semaphore caps how many of them are inside the download manager
//! - Every task owns a cancellation token (child of the scheduler's
//!   shutdown token); stopping a task cancels it
//! - Runs carry a generation number so a stale run finishing late never
//!   overwrites the state of a newer one

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::SchedulerError;
use super::events::SchedulerEvent;
use super::options::SchedulerOptions;
use super::task::{ScheduledDownload, ScheduledDownloadStatus, ScheduledTask, ScheduledTaskStatus};
use crate::download::{DownloadManager, DownloadOptions, DownloadProgress, DownloadStatus};
use crate::events::{DownloadEvent, EventBus};

const TASK_FAILED_MESSAGE: &str = "One or more downloads failed";

/// Fields of a task that [`TaskScheduler::update_task`] may change.
/// `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New start time.
    pub start_time: Option<DateTime<Utc>>,
    /// New end time.
    pub end_time: Option<DateTime<Utc>>,
    /// New per-task concurrency.
    pub max_concurrent_downloads: Option<usize>,
}

/// What one pass of the scheduling loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTick {
    /// Tasks whose run began.
    pub started: Vec<String>,
    /// Tasks stopped because their end time passed.
    pub stopped: Vec<String>,
    /// Completed tasks dropped after their retention period.
    pub removed: Vec<String>,
}

impl SchedulerTick {
    /// True when the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.removed.is_empty()
    }
}

/// Runs groups of downloads on time windows through a [`DownloadManager`].
///
/// Must be created inside a Tokio runtime; the scheduling loop is spawned
/// immediately and runs its first pass right away. Dropping the scheduler
/// stops the loop and cancels every running task.
#[derive(Debug)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug)]
struct SchedulerInner {
    manager: Arc<DownloadManager>,
    options: SchedulerOptions,
    globally_enabled: AtomicBool,
    tasks: Mutex<HashMap<String, TaskSlot>>,
    events: EventBus<SchedulerEvent>,
    shutdown: CancellationToken,
}

#[derive(Debug)]
struct TaskSlot {
    task: ScheduledTask,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    generation: u64,
}

/// Everything one run needs, captured when the run is claimed.
#[derive(Debug)]
struct TaskRun {
    task_id: String,
    generation: u64,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    download_ids: Vec<String>,
    snapshot: ScheduledTask,
}

/// How the watch on a manager download ended.
#[derive(Debug)]
enum WatchOutcome {
    Finished(DownloadProgress),
    Stopped,
    Vanished,
}

impl TaskScheduler {
    /// Creates a scheduler on top of `manager` and starts its loop.
    #[must_use]
    pub fn new(manager: Arc<DownloadManager>, options: SchedulerOptions) -> Self {
        info!(
            check_interval_ms = options.check_interval.as_millis(),
            enabled = options.is_globally_enabled,
            "creating task scheduler"
        );
        let inner = Arc::new(SchedulerInner {
            manager,
            globally_enabled: AtomicBool::new(options.is_globally_enabled),
            tasks: Mutex::new(HashMap::new()),
            events: EventBus::new(options.event_capacity),
            shutdown: CancellationToken::new(),
            options,
        });
        tokio::spawn(run_check_loop(Arc::clone(&inner)));
        Self { inner }
    }

    /// Registers a new task. `max_concurrent_downloads` falls back to the
    /// scheduler default.
    #[instrument(skip(self))]
    pub fn create_task(
        &self,
        name: Option<String>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        max_concurrent_downloads: Option<usize>,
    ) -> ScheduledTask {
        let limit = max_concurrent_downloads.unwrap_or(self.inner.options.default_max_concurrent_downloads);
        let task = ScheduledTask::new(name, start_time, end_time, Some(limit));
        let slot = TaskSlot {
            task: task.clone(),
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            cancel: self.inner.shutdown.child_token(),
            generation: 0,
        };
        self.inner.tasks().insert(task.id.clone(), slot);
        info!(task_id = %task.id, name = task.display_name(), start = %task.start_time, "created task");
        task
    }

    /// Adds a download to a task. `options` defaults to
    /// [`DownloadOptions::new`]; its url and path are always replaced by
    /// `url` and `file_path`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskNotFound`] for an unknown task and
    /// [`SchedulerError::Download`] when the options fail validation.
    pub fn add_download_to_task(
        &self,
        task_id: &str,
        url: &str,
        file_path: impl Into<std::path::PathBuf>,
        options: Option<DownloadOptions>,
    ) -> Result<ScheduledDownload, SchedulerError> {
        let file_path = file_path.into();
        let mut options = options.unwrap_or_else(|| DownloadOptions::new(url, file_path.clone()));
        options.url = url.to_string();
        options.file_path = file_path;
        options.validate()?;

        let download = ScheduledDownload::new(options);
        let mut tasks = self.inner.tasks();
        let slot = tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;
        slot.task.downloads.push(download.clone());
        info!(task_id, download_id = %download.id, url, "added download to task");
        Ok(download)
    }

    /// Removes a download from its task, cancelling it in the manager if it
    /// is running. Returns false if the task or download is unknown.
    pub fn remove_download_from_task(&self, task_id: &str, download_id: &str) -> bool {
        let removed = {
            let mut tasks = self.inner.tasks();
            let Some(slot) = tasks.get_mut(task_id) else {
                return false;
            };
            let Some(index) = slot.task.downloads.iter().position(|d| d.id == download_id) else {
                return false;
            };
            slot.task.downloads.remove(index)
        };

        if let Some(manager_id) = removed.download_id.as_deref() {
            if self.inner.manager.cancel_download(manager_id) {
                debug!(task_id, download_id, manager_id, "cancelled removed download");
            }
        }
        info!(task_id, download_id, "removed download from task");
        true
    }

    /// Moves a download that is not running to another task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskNotFound`] if either task is unknown,
    /// [`SchedulerError::DownloadNotFound`] if the download is not in
    /// `from_task_id`, and [`SchedulerError::DownloadRunning`] while it runs.
    pub fn move_download(
        &self,
        from_task_id: &str,
        to_task_id: &str,
        download_id: &str,
    ) -> Result<(), SchedulerError> {
        let mut tasks = self.inner.tasks();
        if !tasks.contains_key(to_task_id) {
            return Err(SchedulerError::task_not_found(to_task_id));
        }
        let from = tasks
            .get_mut(from_task_id)
            .ok_or_else(|| SchedulerError::task_not_found(from_task_id))?;
        let index = from
            .task
            .downloads
            .iter()
            .position(|d| d.id == download_id)
            .ok_or_else(|| SchedulerError::download_not_found(from_task_id, download_id))?;
        if from.task.downloads[index].status == ScheduledDownloadStatus::Running {
            return Err(SchedulerError::download_running(download_id));
        }
        let download = from.task.downloads.remove(index);

        if let Some(to) = tasks.get_mut(to_task_id) {
            to.task.downloads.push(download);
        }
        info!(download_id, from_task_id, to_task_id, "moved download");
        Ok(())
    }

    /// Enables or disables a task. Returns false for an unknown task.
    pub fn set_task_enabled(&self, task_id: &str, enabled: bool) -> bool {
        let mut tasks = self.inner.tasks();
        let Some(slot) = tasks.get_mut(task_id) else {
            return false;
        };
        slot.task.is_enabled = enabled;
        info!(task_id, enabled, "task enable flag changed");
        true
    }

    /// Changes name, window or concurrency of a task. A new concurrency
    /// limit takes effect on the next run. Returns false for an unknown task.
    pub fn update_task(&self, task_id: &str, update: TaskUpdate) -> bool {
        let mut tasks = self.inner.tasks();
        let Some(slot) = tasks.get_mut(task_id) else {
            return false;
        };
        if let Some(name) = update.name {
            slot.task.name = Some(name);
        }
        if let Some(start) = update.start_time {
            slot.task.start_time = start;
        }
        if let Some(end) = update.end_time {
            slot.task.end_time = Some(end);
        }
        if let Some(limit) = update.max_concurrent_downloads {
            slot.task.max_concurrent_downloads = Some(limit);
            if !slot.task.is_running {
                slot.semaphore = Arc::new(Semaphore::new(limit.max(1)));
            }
        }
        info!(task_id, "updated task");
        true
    }

    /// Runs a task now, regardless of its window or the global switch.
    ///
    /// A finished task is re-armed first: its status returns to Scheduled
    /// and failed or cancelled downloads are queued again. Returns true if
    /// the task is running afterwards, false for an unknown task.
    #[instrument(skip(self))]
    pub fn start_task(&self, task_id: &str) -> bool {
        let run = {
            let mut tasks = self.inner.tasks();
            let Some(slot) = tasks.get_mut(task_id) else {
                return false;
            };
            if slot.task.is_running {
                return true;
            }
            slot.task.is_enabled = true;
            if slot.task.status.is_terminal() {
                rearm(&mut slot.task);
            }
            if slot.cancel.is_cancelled() {
                slot.cancel = self.inner.shutdown.child_token();
            }
            begin_run(slot)
        };
        match run {
            Some(run) => {
                self.inner.launch(run);
                true
            }
            None => false,
        }
    }

    /// Stops a task: cancels its token and its running downloads, marks it
    /// Stopped. Returns false for an unknown task.
    #[instrument(skip(self))]
    pub fn stop_task(&self, task_id: &str) -> bool {
        self.inner.stop_task(task_id, ScheduledTaskStatus::Stopped)
    }

    /// Stops and forgets a task. Returns false for an unknown task.
    #[instrument(skip(self))]
    pub fn remove_task(&self, task_id: &str) -> bool {
        if !self.inner.stop_task(task_id, ScheduledTaskStatus::Cancelled) {
            return false;
        }
        self.inner.tasks().remove(task_id);
        info!(task_id, "removed task");
        true
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn get_task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.inner.tasks().get(task_id).map(|slot| slot.task.clone())
    }

    /// Snapshots of all tasks, oldest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .inner
            .tasks()
            .values()
            .map(|slot| slot.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Turns the scheduling loop's start/stop actions on or off. Running
    /// tasks are left alone.
    pub fn set_globally_enabled(&self, enabled: bool) {
        self.inner.globally_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "scheduler global switch changed");
    }

    /// Current value of the global switch.
    #[must_use]
    pub fn is_globally_enabled(&self) -> bool {
        self.inner.globally_enabled.load(Ordering::SeqCst)
    }

    /// Runs one pass of the scheduling loop now.
    pub fn check_scheduled_tasks(&self) -> SchedulerTick {
        self.inner.check_scheduled_tasks()
    }

    /// Subscribes to scheduler events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Stops the scheduling loop and cancels every running task.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("shutting down task scheduler");
            self.inner.shutdown.cancel();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queues a finished task again.
fn rearm(task: &mut ScheduledTask) {
    task.status = ScheduledTaskStatus::Scheduled;
    task.error_message = None;
    for download in &mut task.downloads {
        if matches!(
            download.status,
            ScheduledDownloadStatus::Failed | ScheduledDownloadStatus::Cancelled
        ) {
            download.status = ScheduledDownloadStatus::Scheduled;
            download.download_id = None;
            download.error_message = None;
        }
    }
}

/// Claims a task for a new run. Must be called with the task lock held.
fn begin_run(slot: &mut TaskSlot) -> Option<TaskRun> {
    if slot.task.is_running || slot.cancel.is_cancelled() {
        return None;
    }
    slot.generation += 1;
    slot.task.is_running = true;
    slot.task.status = ScheduledTaskStatus::Running;
    slot.task.last_run_at = Some(Utc::now());
    slot.task.error_message = None;

    let download_ids = slot
        .task
        .downloads
        .iter()
        .filter(|d| d.status == ScheduledDownloadStatus::Scheduled)
        .map(|d| d.id.clone())
        .collect();
    Some(TaskRun {
        task_id: slot.task.id.clone(),
        generation: slot.generation,
        cancel: slot.cancel.clone(),
        semaphore: Arc::clone(&slot.semaphore),
        download_ids,
        snapshot: slot.task.clone(),
    })
}

async fn run_check_loop(inner: Arc<SchedulerInner>) {
    let mut interval = tokio::time::interval(inner.options.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let pass = Arc::clone(&inner);
        match tokio::spawn(async move { pass.check_scheduled_tasks() }).await {
            Ok(tick) if !tick.is_empty() => debug!(?tick, "scheduler pass"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "scheduler pass panicked"),
        }
    }
    debug!("scheduler loop stopped");
}

async fn execute_task(inner: Arc<SchedulerInner>, run: TaskRun) {
    let mut workers = JoinSet::new();
    for download_id in &run.download_ids {
        workers.spawn(execute_download(
            Arc::clone(&inner),
            run.task_id.clone(),
            download_id.clone(),
            Arc::clone(&run.semaphore),
            run.cancel.clone(),
        ));
    }

    let mut crashed = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(task_id = %run.task_id, error = %e, "scheduled download worker crashed");
            crashed = Some(e.to_string());
        }
    }

    if let Some(event) = inner.finish_run(&run.task_id, run.generation, crashed) {
        inner.events.publish(event);
    }
}

async fn execute_download(
    inner: Arc<SchedulerInner>,
    task_id: String,
    download_id: String,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let permit = tokio::select! {
        () = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        inner.cancel_pending(&task_id, &download_id);
        return;
    };
    // Permit is dropped when this function returns (RAII)
    let _permit = permit;
    if cancel.is_cancelled() {
        inner.cancel_pending(&task_id, &download_id);
        return;
    }

    let Some((options, task, download)) = inner.claim_download(&task_id, &download_id) else {
        debug!(task_id = %task_id, download_id = %download_id, "download left the task before it could start");
        return;
    };
    inner
        .events
        .publish(SchedulerEvent::download_started(task, download));

    let mut rx = inner.manager.subscribe();
    let manager_id = match inner.manager.start_download(options) {
        Ok(id) => id,
        Err(e) => {
            warn!(task_id = %task_id, download_id = %download_id, error = %e, "failed to start scheduled download");
            inner.record_failure(&task_id, &download_id, e.to_string());
            return;
        }
    };
    if !inner.link_download(&task_id, &download_id, &manager_id) {
        inner.manager.cancel_download(&manager_id);
        return;
    }
    info!(task_id = %task_id, download_id = %download_id, manager_id = %manager_id, "started scheduled download");

    let outcome = inner.watch_download(&mut rx, &manager_id, &cancel).await;
    inner.apply_outcome(&task_id, &download_id, outcome);
}

impl SchedulerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, TaskSlot>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(self: &Arc<Self>, run: TaskRun) {
        info!(
            task_id = %run.task_id,
            name = run.snapshot.display_name(),
            downloads = run.download_ids.len(),
            "started executing task"
        );
        self.events
            .publish(SchedulerEvent::task_started(run.snapshot.clone()));
        tokio::spawn(execute_task(Arc::clone(self), run));
    }

    fn check_scheduled_tasks(self: &Arc<Self>) -> SchedulerTick {
        let mut tick = SchedulerTick::default();
        if !self.globally_enabled.load(Ordering::SeqCst) || self.shutdown.is_cancelled() {
            return tick;
        }
        let now = Utc::now();

        let to_stop: Vec<String> = self
            .tasks()
            .values()
            .filter(|slot| slot.task.is_running && slot.task.should_stop_at(now))
            .map(|slot| slot.task.id.clone())
            .collect();
        for task_id in to_stop {
            if self.stop_task(&task_id, ScheduledTaskStatus::Stopped) {
                tick.stopped.push(task_id);
            }
        }

        let runs: Vec<TaskRun> = self
            .tasks()
            .values_mut()
            .filter(|slot| !slot.task.is_running && slot.task.should_run_at(now))
            .filter_map(begin_run)
            .collect();
        for run in runs {
            tick.started.push(run.task_id.clone());
            self.launch(run);
        }

        if self.options.auto_remove_completed_tasks {
            let retention = self.options.completed_task_retention;
            let mut tasks = self.tasks();
            let expired: Vec<String> = tasks
                .values()
                .filter(|slot| {
                    slot.task.status == ScheduledTaskStatus::Completed
                        && slot
                            .task
                            .last_run_at
                            .is_some_and(|at| (now - at).to_std().is_ok_and(|age| age > retention))
                })
                .map(|slot| slot.task.id.clone())
                .collect();
            for task_id in expired {
                tasks.remove(&task_id);
                info!(task_id = %task_id, "removed completed task after retention");
                tick.removed.push(task_id);
            }
        }
        tick
    }

    fn stop_task(&self, task_id: &str, status: ScheduledTaskStatus) -> bool {
        let (snapshot, running) = {
            let mut tasks = self.tasks();
            let Some(slot) = tasks.get_mut(task_id) else {
                return false;
            };
            slot.cancel.cancel();
            let mut running = Vec::new();
            for download in &mut slot.task.downloads {
                if download.status == ScheduledDownloadStatus::Running {
                    download.status = ScheduledDownloadStatus::Cancelled;
                    running.extend(download.download_id.clone());
                }
            }
            slot.task.is_running = false;
            slot.task.status = status;
            (slot.task.clone(), running)
        };

        for manager_id in &running {
            self.manager.cancel_download(manager_id);
        }
        info!(task_id, cancelled_downloads = running.len(), "stopped task");
        self.events.publish(SchedulerEvent::task_stopped(snapshot));
        true
    }

    /// Marks a still-queued download Cancelled after its run was stopped.
    fn cancel_pending(&self, task_id: &str, download_id: &str) {
        let mut tasks = self.tasks();
        let download = tasks
            .get_mut(task_id)
            .and_then(|slot| slot.task.download_mut(download_id));
        if let Some(download) = download {
            if download.status == ScheduledDownloadStatus::Scheduled {
                download.status = ScheduledDownloadStatus::Cancelled;
            }
        }
    }

    /// Moves a Scheduled download to Running and returns what the run needs.
    fn claim_download(
        &self,
        task_id: &str,
        download_id: &str,
    ) -> Option<(DownloadOptions, ScheduledTask, ScheduledDownload)> {
        let mut tasks = self.tasks();
        let slot = tasks.get_mut(task_id)?;
        let download = slot.task.download_mut(download_id)?;
        if download.status != ScheduledDownloadStatus::Scheduled {
            return None;
        }
        download.status = ScheduledDownloadStatus::Running;
        download.error_message = None;
        let download = download.clone();
        Some((download.options.clone(), slot.task.clone(), download))
    }

    /// Records the manager id. False if the download was removed meanwhile.
    fn link_download(&self, task_id: &str, download_id: &str, manager_id: &str) -> bool {
        let mut tasks = self.tasks();
        let download = tasks
            .get_mut(task_id)
            .and_then(|slot| slot.task.download_mut(download_id));
        match download {
            Some(download) if download.status == ScheduledDownloadStatus::Running => {
                download.download_id = Some(manager_id.to_string());
                true
            }
            _ => false,
        }
    }

    async fn watch_download(
        &self,
        rx: &mut broadcast::Receiver<DownloadEvent>,
        manager_id: &str,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        let mut poll = tokio::time::interval(self.options.download_poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.manager.cancel_download(manager_id);
                    return WatchOutcome::Stopped;
                }
                event = rx.recv() => match event {
                    Ok(event) if event.download_id() == manager_id && event.is_terminal() => {
                        return WatchOutcome::Finished(event.progress().clone());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "scheduler lagged behind download events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return WatchOutcome::Vanished,
                },
                _ = poll.tick() => match self.manager.get_progress(manager_id) {
                    Some(progress) if progress.status.is_terminal() => {
                        return WatchOutcome::Finished(progress);
                    }
                    Some(_) => {}
                    None => return drain_terminal(rx, manager_id),
                },
            }
        }
    }

    fn record_failure(&self, task_id: &str, download_id: &str, error: String) {
        let event = {
            let mut tasks = self.tasks();
            let Some(slot) = tasks.get_mut(task_id) else {
                return;
            };
            let Some(download) = slot.task.download_mut(download_id) else {
                return;
            };
            download.status = ScheduledDownloadStatus::Failed;
            download.error_message = Some(error.clone());
            let download = download.clone();
            SchedulerEvent::download_failed(slot.task.clone(), download, error)
        };
        self.events.publish(event);
    }

    fn apply_outcome(&self, task_id: &str, download_id: &str, outcome: WatchOutcome) {
        let event = {
            let mut tasks = self.tasks();
            let Some(slot) = tasks.get_mut(task_id) else {
                return;
            };
            let Some(download) = slot.task.download_mut(download_id) else {
                return;
            };
            if download.status != ScheduledDownloadStatus::Running {
                return;
            }

            match outcome {
                WatchOutcome::Finished(progress) => match progress.status {
                    DownloadStatus::Completed => {
                        download.status = ScheduledDownloadStatus::Completed;
                        download.completed_at = Some(Utc::now());
                        let download = download.clone();
                        if self.options.auto_remove_completed_downloads {
                            slot.task.downloads.retain(|d| d.id != download_id);
                        }
                        info!(task_id, download_id, "scheduled download completed");
                        Some(SchedulerEvent::download_completed(slot.task.clone(), download))
                    }
                    DownloadStatus::Failed => {
                        let error = progress
                            .error_message
                            .unwrap_or_else(|| "Download failed".to_string());
                        download.status = ScheduledDownloadStatus::Failed;
                        download.error_message = Some(error.clone());
                        let download = download.clone();
                        warn!(task_id, download_id, error = %error, "scheduled download failed");
                        Some(SchedulerEvent::download_failed(
                            slot.task.clone(),
                            download,
                            error,
                        ))
                    }
                    _ => {
                        download.status = ScheduledDownloadStatus::Cancelled;
                        None
                    }
                },
                WatchOutcome::Stopped | WatchOutcome::Vanished => {
                    download.status = ScheduledDownloadStatus::Cancelled;
                    None
                }
            }
        };
        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    /// Settles the task after its downloads finished. Returns the event to
    /// publish, or `None` when the run was stopped or superseded.
    fn finish_run(
        &self,
        task_id: &str,
        generation: u64,
        crashed: Option<String>,
    ) -> Option<SchedulerEvent> {
        let mut tasks = self.tasks();
        let slot = tasks.get_mut(task_id)?;
        if slot.generation != generation {
            return None;
        }
        slot.task.is_running = false;
        if slot.cancel.is_cancelled() {
            return None;
        }

        let task = &mut slot.task;
        if let Some(error) = crashed {
            task.status = ScheduledTaskStatus::Failed;
            task.error_message = Some(error.clone());
            return Some(SchedulerEvent::task_failed(task.clone(), error));
        }

        let all_done = task.downloads.iter().all(|d| {
            matches!(
                d.status,
                ScheduledDownloadStatus::Completed
                    | ScheduledDownloadStatus::Removed
                    | ScheduledDownloadStatus::Cancelled
            )
        });
        let any_failed = task
            .downloads
            .iter()
            .any(|d| d.status == ScheduledDownloadStatus::Failed);

        if all_done {
            task.status = ScheduledTaskStatus::Completed;
            info!(task_id, "task completed");
            Some(SchedulerEvent::task_completed(task.clone()))
        } else if any_failed {
            task.status = ScheduledTaskStatus::Failed;
            task.error_message = Some(TASK_FAILED_MESSAGE.to_string());
            warn!(task_id, "task failed");
            Some(SchedulerEvent::task_failed(task.clone(), TASK_FAILED_MESSAGE))
        } else {
            // Downloads added during the run are still queued.
            task.status = ScheduledTaskStatus::Scheduled;
            None
        }
    }
}

/// Looks for a terminal event already buffered for a download that has
/// left the manager registry.
fn drain_terminal(rx: &mut broadcast::Receiver<DownloadEvent>, manager_id: &str) -> WatchOutcome {
    loop {
        match rx.try_recv() {
            Ok(event) if event.download_id() == manager_id && event.is_terminal() => {
                return WatchOutcome::Finished(event.progress().clone());
            }
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return WatchOutcome::Vanished,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::DownloadManagerOptions;
    use chrono::Duration;

    fn scheduler(enabled: bool) -> TaskScheduler {
        let manager = Arc::new(DownloadManager::new(DownloadManagerOptions::default()));
        TaskScheduler::new(
            manager,
            SchedulerOptions {
                is_globally_enabled: enabled,
                check_interval: std::time::Duration::from_secs(3600),
                ..SchedulerOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_task_applies_default_concurrency() {
        let scheduler = scheduler(true);
        let task = scheduler.create_task(Some("nightly".into()), Utc::now(), None, None);
        assert_eq!(task.max_concurrent_downloads, Some(3));
        assert_eq!(task.status, ScheduledTaskStatus::Scheduled);
        assert_eq!(scheduler.get_task(&task.id).unwrap(), task);
    }

    #[tokio::test]
    async fn test_add_download_validates_and_overrides_url() {
        let scheduler = scheduler(true);
        let task = scheduler.create_task(None, Utc::now() + Duration::hours(1), None, None);

        let options = DownloadOptions::new("https://ignored.example/x", "/tmp/ignored");
        let download = scheduler
            .add_download_to_task(&task.id, "https://example.com/a.bin", "/tmp/a.bin", Some(options))
            .unwrap();
        assert_eq!(download.options.url, "https://example.com/a.bin");
        assert_eq!(download.url, "https://example.com/a.bin");

        assert!(matches!(
            scheduler.add_download_to_task(&task.id, "not a url", "/tmp/b", None),
            Err(SchedulerError::Download(_))
        ));
        assert!(matches!(
            scheduler.add_download_to_task("missing", "https://example.com/a", "/tmp/a", None),
            Err(SchedulerError::TaskNotFound { .. })
        ));
        assert_eq!(scheduler.get_task(&task.id).unwrap().downloads.len(), 1);
    }

    #[tokio::test]
    async fn test_move_download_between_tasks() {
        let scheduler = scheduler(true);
        let later = Utc::now() + Duration::hours(1);
        let a = scheduler.create_task(Some("a".into()), later, None, None);
        let b = scheduler.create_task(Some("b".into()), later, None, None);
        let download = scheduler
            .add_download_to_task(&a.id, "https://example.com/f", "/tmp/f", None)
            .unwrap();

        scheduler.move_download(&a.id, &b.id, &download.id).unwrap();
        assert!(scheduler.get_task(&a.id).unwrap().downloads.is_empty());
        assert_eq!(scheduler.get_task(&b.id).unwrap().downloads[0].id, download.id);

        assert!(matches!(
            scheduler.move_download(&a.id, &b.id, &download.id),
            Err(SchedulerError::DownloadNotFound { .. })
        ));
        assert!(matches!(
            scheduler.move_download(&b.id, "missing", &download.id),
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_move_download_rejects_running_download() {
        let scheduler = scheduler(true);
        let later = Utc::now() + Duration::hours(1);
        let a = scheduler.create_task(None, later, None, None);
        let b = scheduler.create_task(None, later, None, None);
        let download = scheduler
            .add_download_to_task(&a.id, "https://example.com/f", "/tmp/f", None)
            .unwrap();
        scheduler
            .inner
            .tasks()
            .get_mut(&a.id)
            .unwrap()
            .task
            .download_mut(&download.id)
            .unwrap()
            .status = ScheduledDownloadStatus::Running;

        assert!(matches!(
            scheduler.move_download(&a.id, &b.id, &download.id),
            Err(SchedulerError::DownloadRunning { .. })
        ));
        assert_eq!(scheduler.get_task(&a.id).unwrap().downloads.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_download_from_task() {
        let scheduler = scheduler(true);
        let task = scheduler.create_task(None, Utc::now() + Duration::hours(1), None, None);
        let download = scheduler
            .add_download_to_task(&task.id, "https://example.com/f", "/tmp/f", None)
            .unwrap();
        assert!(scheduler.remove_download_from_task(&task.id, &download.id));
        assert!(!scheduler.remove_download_from_task(&task.id, &download.id));
        assert!(!scheduler.remove_download_from_task("missing", &download.id));
        assert!(scheduler.get_task(&task.id).unwrap().downloads.is_empty());
    }

    #[tokio::test]
    async fn test_update_task_and_enable_flag() {
        let scheduler = scheduler(true);
        let task = scheduler.create_task(None, Utc::now(), None, Some(2));
        let end = Utc::now() + Duration::hours(2);
        assert!(scheduler.update_task(
            &task.id,
            TaskUpdate {
                name: Some("renamed".into()),
                end_time: Some(end),
                max_concurrent_downloads: Some(5),
                ..TaskUpdate::default()
            }
        ));
        assert!(scheduler.set_task_enabled(&task.id, false));

        let updated = scheduler.get_task(&task.id).unwrap();
        assert_eq!(updated.name.as_deref(), Some("renamed"));
        assert_eq!(updated.end_time, Some(end));
        assert_eq!(updated.max_concurrent_downloads, Some(5));
        assert!(!updated.is_enabled);
        assert_eq!(
            scheduler.inner.tasks()[&task.id].semaphore.available_permits(),
            5
        );
        assert!(!scheduler.update_task("missing", TaskUpdate::default()));
        assert!(!scheduler.set_task_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_globally_disabled_pass_does_nothing() {
        let scheduler = scheduler(false);
        let task = scheduler.create_task(None, Utc::now() - Duration::seconds(1), None, None);
        for _ in 0..3 {
            assert!(scheduler.check_scheduled_tasks().is_empty());
        }
        let task = scheduler.get_task(&task.id).unwrap();
        assert_eq!(task.status, ScheduledTaskStatus::Scheduled);
        assert!(!task.is_running);
        assert!(!scheduler.is_globally_enabled());
    }

    #[tokio::test]
    async fn test_empty_task_completes_when_due() {
        let scheduler = scheduler(true);
        let mut rx = scheduler.subscribe();
        let task = scheduler.create_task(None, Utc::now() - Duration::seconds(1), None, None);

        let tick = scheduler.check_scheduled_tasks();
        assert_eq!(tick.started, vec![task.id.clone()]);

        let started = rx.recv().await.unwrap();
        assert_eq!(started.name(), "task_started");
        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.name(), "task_completed");
        assert_eq!(completed.task().status, ScheduledTaskStatus::Completed);

        // Terminal tasks are not picked up again.
        assert!(scheduler.check_scheduled_tasks().started.is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_remove_task() {
        let scheduler = scheduler(true);
        let mut rx = scheduler.subscribe();
        let task = scheduler.create_task(None, Utc::now() + Duration::hours(1), None, None);

        assert!(scheduler.stop_task(&task.id));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "task_stopped");
        assert_eq!(scheduler.get_task(&task.id).unwrap().status, ScheduledTaskStatus::Stopped);

        assert!(scheduler.remove_task(&task.id));
        assert!(scheduler.get_task(&task.id).is_none());
        assert!(!scheduler.remove_task(&task.id));
        assert!(!scheduler.stop_task(&task.id));
    }

    #[tokio::test]
    async fn test_start_task_rearms_stopped_task() {
        let scheduler = scheduler(true);
        let task = scheduler.create_task(None, Utc::now() + Duration::hours(1), None, None);
        let download = scheduler
            .add_download_to_task(&task.id, "https://example.com/f", "/tmp/f", None)
            .unwrap();
        scheduler.stop_task(&task.id);

        let mut stopped = scheduler.get_task(&task.id).unwrap();
        stopped.downloads[0].status = ScheduledDownloadStatus::Cancelled;
        rearm(&mut stopped);
        assert_eq!(stopped.status, ScheduledTaskStatus::Scheduled);
        assert_eq!(stopped.downloads[0].id, download.id);
        assert_eq!(stopped.downloads[0].status, ScheduledDownloadStatus::Scheduled);

        assert!(!scheduler.start_task("missing"));
    }

    #[tokio::test]
    async fn test_tasks_sorted_by_creation() {
        let scheduler = scheduler(true);
        let first = scheduler.create_task(Some("1".into()), Utc::now(), None, None);
        let second = scheduler.create_task(Some("2".into()), Utc::now(), None, None);
        let ids: Vec<String> = scheduler.tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_drain_terminal_finds_buffered_event() {
        let bus: EventBus<DownloadEvent> = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut other = DownloadProgress::new("other", "o");
        other.status = DownloadStatus::Completed;
        let mut mine = DownloadProgress::new("mine", "m");
        mine.status = DownloadStatus::Failed;
        bus.publish(DownloadEvent::DownloadCompleted(other));
        bus.publish(DownloadEvent::DownloadFailed(mine));

        match drain_terminal(&mut rx, "mine") {
            WatchOutcome::Finished(progress) => assert_eq!(progress.status, DownloadStatus::Failed),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(drain_terminal(&mut rx, "mine"), WatchOutcome::Vanished));
    }
}
