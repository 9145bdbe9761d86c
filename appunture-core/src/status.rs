//! User-facing sync state and its derivation from the queues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{PendingImage, PendingOperation, UploadProgress};
use crate::queue::{ImageQueue, OperationLog, QueueCounts, QueueFilter};

/// Message shown once everything queued has reached the server.
pub const COMPLETION_MESSAGE: &str = "All changes synced";

/// What the UI renders: banner flags, counts and the failed lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub sync_in_progress: bool,
    pub pending_operations: usize,
    pub pending_images: usize,
    pub failed_operations: Vec<PendingOperation>,
    pub failed_images: Vec<PendingImage>,
    pub uploads: Vec<UploadProgress>,
    pub last_sync: Option<DateTime<Utc>>,
    pub notification_message: Option<String>,
}

impl SyncStatus {
    pub fn failed_count(&self) -> usize {
        self.failed_operations.len() + self.failed_images.len()
    }

    /// Nothing left to deliver and nothing failed.
    pub fn is_settled(&self) -> bool {
        self.pending_operations == 0 && self.pending_images == 0 && self.failed_count() == 0
    }
}

/// Point-in-time view of both queues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueView {
    pub operations: QueueCounts,
    pub images: QueueCounts,
    pub failed_operations: Vec<PendingOperation>,
    pub failed_images: Vec<PendingImage>,
    pub uploads: Vec<UploadProgress>,
}

impl QueueView {
    pub async fn capture(operations: &OperationLog, images: &ImageQueue) -> Self {
        Self {
            operations: operations.counts().await,
            images: images.counts().await,
            failed_operations: operations.list(&QueueFilter::failed()).await,
            failed_images: images.list(&QueueFilter::failed()).await,
            uploads: images.uploads(),
        }
    }
}

/// Pure derivation of [`SyncStatus`] values.
pub struct StatusProjector;

impl StatusProjector {
    /// Refreshes counts and failed lists, keeping flags and the message.
    pub fn project(current: &SyncStatus, view: QueueView) -> SyncStatus {
        SyncStatus {
            pending_operations: view.operations.active(),
            pending_images: view.images.active(),
            failed_operations: view.failed_operations,
            failed_images: view.failed_images,
            uploads: view.uploads,
            ..current.clone()
        }
    }

    /// State after a finished pass.
    ///
    /// The completion message is only set when the pass delivered something
    /// and left both queues settled.
    pub fn complete_pass(
        current: &SyncStatus,
        view: QueueView,
        dispatched: usize,
        last_sync: Option<DateTime<Utc>>,
    ) -> SyncStatus {
        let mut next = Self::project(current, view);
        next.sync_in_progress = false;
        if last_sync.is_some() {
            next.last_sync = last_sync;
        }
        if dispatched > 0 && next.is_settled() {
            next.notification_message = Some(COMPLETION_MESSAGE.to_string());
        }
        next
    }
}

/// Holds the current [`SyncStatus`] and broadcasts every change.
#[derive(Debug)]
pub struct StatusStore {
    sender: watch::Sender<SyncStatus>,
}

impl StatusStore {
    pub fn new(initial: SyncStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn current(&self) -> SyncStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.sender.subscribe()
    }

    /// Applies `change`; subscribers are woken only if the status changed.
    pub fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut SyncStatus),
    {
        self.sender.send_if_modified(|status| {
            let before = status.clone();
            change(status);
            *status != before
        });
    }

    /// Applies a queue view to whatever the status is at the moment of the write.
    pub fn apply_view(&self, view: QueueView) {
        self.update(|status| *status = StatusProjector::project(status, view));
    }

    pub fn finish_pass(
        &self,
        view: QueueView,
        dispatched: usize,
        last_sync: Option<DateTime<Utc>>,
    ) {
        self.update(|status| {
            *status = StatusProjector::complete_pass(status, view, dispatched, last_sync)
        });
    }

    /// Clears the notification. Safe to call when none is shown.
    pub fn acknowledge_notification(&self) {
        self.update(|status| status.notification_message = None);
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}
