//! Broadcast event bus shared by the download manager and the scheduler.

use tokio::sync::broadcast;

use crate::download::DownloadProgress;

/// Broadcast channel wrapper.
///
/// `publish()` is sync and safe from any thread. If there are no
/// subscribers the event is dropped. Sends are serialized by the channel,
/// so subscribers never observe two events interleaved.
#[derive(Clone, Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: impl Into<E>) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to all future events.
    ///
    /// Slow subscribers receive `RecvError::Lagged(n)` instead of blocking producers.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Lifecycle notifications from a [`DownloadManager`](crate::download::DownloadManager).
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Periodic tick, pause/resume, or the final Cancelled snapshot.
    ProgressChanged(DownloadProgress),
    /// The destination file is complete.
    DownloadCompleted(DownloadProgress),
    /// The download failed; `error_message` is set.
    DownloadFailed(DownloadProgress),
}

impl DownloadEvent {
    /// Snapshot carried by the event.
    #[must_use]
    pub fn progress(&self) -> &DownloadProgress {
        match self {
            Self::ProgressChanged(p) | Self::DownloadCompleted(p) | Self::DownloadFailed(p) => p,
        }
    }

    /// Identifier of the download the event is about.
    #[must_use]
    pub fn download_id(&self) -> &str {
        &self.progress().download_id
    }

    /// True for events after which the download leaves the registry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.progress().status.is_terminal()
    }
}
