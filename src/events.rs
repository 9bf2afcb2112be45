//! Download lifecycle notifications and the in-process fan-out bus.
//!
//! The registry publishes [`DownloadEvent`]s to an [`EventSink`]. How those
//! events reach remote clients (websocket, SSE, ...) is up to the embedding
//! application; [`EventBus`] is the in-process fan-out it can subscribe to.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::download::DownloadSnapshot;

/// A notification about a download's lifecycle.
///
/// For a given id, `DownloadAdded` precedes every `DownloadUpdated`, which
/// all precede the single `DownloadRemoved`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum DownloadEvent {
    /// A download resolved its file name and is about to stream.
    DownloadAdded {
        /// Snapshot taken right after the download became active.
        download: DownloadSnapshot,
    },
    /// Periodic progress sample.
    DownloadUpdated {
        /// Download id.
        id: String,
        /// Bytes written so far.
        bytes_downloaded: u64,
        /// Expected size, `-1` when unknown.
        total_bytes: i64,
        /// Bytes per second over the last sampling interval.
        speed: f64,
    },
    /// The download reached a terminal state.
    DownloadRemoved {
        /// Download id.
        id: String,
        /// `true` only when the file was finalized on disk.
        completed: bool,
    },
    /// The download was paused by a caller.
    DownloadPaused {
        /// Download id.
        id: String,
    },
    /// The download was resumed by a caller.
    DownloadResumed {
        /// Download id.
        id: String,
    },
}

impl DownloadEvent {
    /// Id of the download the event refers to.
    #[must_use]
    pub fn download_id(&self) -> &str {
        match self {
            Self::DownloadAdded { download } => &download.id,
            Self::DownloadUpdated { id, .. }
            | Self::DownloadRemoved { id, .. }
            | Self::DownloadPaused { id }
            | Self::DownloadResumed { id } => id,
        }
    }
}

/// Destination for download notifications.
pub trait EventSink: Send + Sync {
    /// Publishes one event. Must not block.
    fn publish(&self, event: DownloadEvent);
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`DownloadEvent`].
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: DownloadEvent) {
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }
}
