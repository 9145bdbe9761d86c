//! Durable FIFO queues of pending mutations.
//!
//! A [`Queue`] keeps every record in memory, ordered by `(created_at, sequence)`,
//! and mirrors each change to its [`QueueStore`]. All transitions take the
//! queue lock, so two callers can never move the same record at once.
//!
//! Storage failures never fail a transition: the change stays in memory, the
//! id is remembered as dirty and [`Queue::checkpoint`] writes it later.

mod record;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{
    EntityType, OperationId, OperationStatus, PendingImage, PendingOperation, TargetKey,
    UploadProgress,
};
use crate::store::{QueueStore, StoreError};

pub use record::QueueRecord;

/// The log of pending JSON mutations.
pub type OperationLog = Queue<PendingOperation>;

/// The sub-queue of pending image uploads.
pub type ImageQueue = Queue<PendingImage>;

/// Errors raised by queue transitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Operation not found: {0}")]
    NotFound(OperationId),

    #[error("Operation {id} is {from} and cannot become {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation {id} blocked: {target} already has an operation in flight")]
    TargetBusy { id: OperationId, target: TargetKey },
}

/// Selects records from a queue.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    statuses: Vec<OperationStatus>,
    entity_type: Option<EntityType>,
}

impl QueueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self::with_statuses(&[OperationStatus::Pending])
    }

    pub fn failed() -> Self {
        Self::with_statuses(&[OperationStatus::Failed])
    }

    /// Records that still need delivery: pending or in flight.
    pub fn active() -> Self {
        Self::with_statuses(&[OperationStatus::Pending, OperationStatus::InFlight])
    }

    pub fn with_statuses(statuses: &[OperationStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            entity_type: None,
        }
    }

    pub fn entity(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    fn matches<T: QueueRecord>(&self, record: &T) -> bool {
        let status_ok =
            self.statuses.is_empty() || self.statuses.contains(&record.delivery().status);
        let entity_ok = self
            .entity_type
            .map_or(true, |entity| record.target().entity_type == entity);
        status_ok && entity_ok
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Records still awaiting delivery.
    pub fn active(&self) -> usize {
        self.pending + self.in_flight
    }
}

struct QueueState<T> {
    records: Vec<T>,
    next_sequence: u64,
    unsaved: HashSet<OperationId>,
    unremoved: HashSet<OperationId>,
}

/// A durable queue of [`QueueRecord`]s.
pub struct Queue<T: QueueRecord> {
    name: &'static str,
    store: Arc<dyn QueueStore<T>>,
    state: Mutex<QueueState<T>>,
    progress: std::sync::Mutex<HashMap<OperationId, u8>>,
}

impl<T: QueueRecord> Queue<T> {
    /// Opens a queue over `store`, loading everything it holds.
    ///
    /// Records left in flight by a previous run are put back to pending.
    pub async fn open(name: &'static str, store: Arc<dyn QueueStore<T>>) -> Result<Self, StoreError> {
        let mut records = store.load_all().await?;
        records.sort_by_key(|r| (r.created_at(), r.sequence()));

        let next_sequence = records.iter().map(|r| r.sequence()).max().map_or(1, |s| s + 1);
        let mut state = QueueState {
            records,
            next_sequence,
            unsaved: HashSet::new(),
            unremoved: HashSet::new(),
        };

        let interrupted: Vec<OperationId> = state
            .records
            .iter_mut()
            .filter(|r| r.delivery().status == OperationStatus::InFlight)
            .map(|r| {
                r.delivery_mut().release();
                r.id()
            })
            .collect();

        let queue = Self {
            name,
            store,
            state: Mutex::new(QueueState {
                records: Vec::new(),
                next_sequence: 0,
                unsaved: HashSet::new(),
                unremoved: HashSet::new(),
            }),
            progress: std::sync::Mutex::new(HashMap::new()),
        };

        if !interrupted.is_empty() {
            tracing::info!(
                "{}: resuming {} operation(s) interrupted in flight",
                name,
                interrupted.len()
            );
            for id in interrupted {
                queue.persist(&mut state, id).await;
            }
        }

        tracing::debug!("{}: opened with {} record(s)", name, state.records.len());
        *queue.state.lock().await = state;
        Ok(queue)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stores a new record and returns it.
    ///
    /// Never fails: if storage rejects the write the record is kept in memory
    /// and written at the next checkpoint.
    pub async fn append(&self, draft: T::Draft) -> T {
        let mut state = self.state.lock().await;

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        // Keep created_at monotonic even if the wall clock steps backwards.
        let now = Utc::now();
        let created_at = state
            .records
            .last()
            .map(|r| r.created_at())
            .filter(|last| *last > now)
            .unwrap_or(now);

        let record = T::from_draft(draft, OperationId::new(), sequence, created_at);
        let id = record.id();
        state.records.push(record.clone());
        self.persist(&mut state, id).await;

        tracing::debug!("{}: appended {} (sequence {})", self.name, id, sequence);
        record
    }

    /// Returns matching records in replay order.
    pub async fn list(&self, filter: &QueueFilter) -> Vec<T> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|r| filter.matches(*r))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: OperationId) -> Option<T> {
        let state = self.state.lock().await;
        state.records.iter().find(|r| r.id() == id).cloned()
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in &state.records {
            match record.delivery().status {
                OperationStatus::Pending => counts.pending += 1,
                OperationStatus::InFlight => counts.in_flight += 1,
                OperationStatus::Failed => counts.failed += 1,
                OperationStatus::Done => {}
            }
        }
        counts
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    /// Returns true if some record for `target` is in flight.
    pub async fn conflicting_in_flight(&self, target: &TargetKey) -> bool {
        let state = self.state.lock().await;
        state.records.iter().any(|r| {
            r.delivery().status == OperationStatus::InFlight && &r.target() == target
        })
    }

    /// Moves a pending record in flight and counts the delivery attempt.
    pub async fn mark_in_flight(&self, id: OperationId) -> Result<T, QueueError> {
        let mut state = self.state.lock().await;
        let index = Self::position(&state, id)?;
        Self::expect_status(&state.records[index], OperationStatus::Pending, OperationStatus::InFlight)?;

        let target = state.records[index].target();
        let busy = state.records.iter().any(|r| {
            r.id() != id && r.delivery().status == OperationStatus::InFlight && r.target() == target
        });
        if busy {
            return Err(QueueError::TargetBusy { id, target });
        }

        state.records[index].delivery_mut().begin_attempt(Utc::now());
        let record = state.records[index].clone();
        self.persist(&mut state, id).await;
        Ok(record)
    }

    /// Removes a delivered record.
    pub async fn mark_done(&self, id: OperationId) -> Result<T, QueueError> {
        let mut state = self.state.lock().await;
        let index = Self::position(&state, id)?;
        Self::expect_status(&state.records[index], OperationStatus::InFlight, OperationStatus::Done)?;

        let record = state.records.remove(index);
        self.forget(&mut state, id).await;
        Ok(record)
    }

    /// Returns an in-flight record to pending after a retryable failure.
    pub async fn mark_retry(&self, id: OperationId, error: impl Into<String>) -> Result<T, QueueError> {
        let error = error.into();
        self.transition(id, &[OperationStatus::InFlight], OperationStatus::Pending, |d| {
            d.retry_later(error)
        })
        .await
    }

    /// Returns an in-flight record that was never sent back to pending.
    ///
    /// The attempt counted by [`Queue::mark_in_flight`] is given back.
    pub async fn release(&self, id: OperationId) -> Result<T, QueueError> {
        self.transition(id, &[OperationStatus::InFlight], OperationStatus::Pending, |d| {
            d.abandon_attempt()
        })
        .await
    }

    /// Parks a record as failed. It is no longer dispatched automatically.
    pub async fn mark_failed(&self, id: OperationId, error: impl Into<String>) -> Result<T, QueueError> {
        let error = error.into();
        self.transition(
            id,
            &[OperationStatus::InFlight, OperationStatus::Pending],
            OperationStatus::Failed,
            |d| d.fail(error),
        )
        .await
    }

    /// Puts a failed record back in line with a fresh attempt budget.
    pub async fn reset(&self, id: OperationId) -> Result<T, QueueError> {
        self.transition(id, &[OperationStatus::Failed], OperationStatus::Pending, |d| {
            d.reset()
        })
        .await
    }

    /// Resets every failed record. Returns the ids that were reset.
    pub async fn reset_failed(&self) -> Vec<OperationId> {
        let ids = self.failed_ids().await;
        let mut reset = Vec::with_capacity(ids.len());
        for id in ids {
            if self.reset(id).await.is_ok() {
                reset.push(id);
            }
        }
        reset
    }

    /// Drops a failed record on user request.
    pub async fn discard(&self, id: OperationId) -> Result<T, QueueError> {
        let mut state = self.state.lock().await;
        let index = Self::position(&state, id)?;
        Self::expect_status(&state.records[index], OperationStatus::Failed, OperationStatus::Done)?;

        let record = state.records.remove(index);
        self.forget(&mut state, id).await;
        tracing::info!("{}: discarded failed operation {}", self.name, id);
        Ok(record)
    }

    /// Drops every failed record. Returns how many were removed.
    pub async fn discard_failed(&self) -> usize {
        let ids = self.failed_ids().await;
        let mut removed = 0;
        for id in ids {
            if self.discard(id).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Applies an in-place change to a record and persists it.
    pub async fn modify<F>(&self, id: OperationId, change: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut T),
    {
        let mut state = self.state.lock().await;
        let index = Self::position(&state, id)?;
        change(&mut state.records[index]);
        let record = state.records[index].clone();
        self.persist(&mut state, id).await;
        Ok(record)
    }

    /// Writes every change storage rejected earlier.
    ///
    /// Returns how many writes were applied; on failure the remaining changes
    /// stay dirty for the next checkpoint.
    pub async fn checkpoint(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut applied = 0;

        let unremoved: Vec<OperationId> = state.unremoved.iter().copied().collect();
        for id in unremoved {
            self.store.remove(id).await?;
            state.unremoved.remove(&id);
            applied += 1;
        }

        let unsaved: Vec<OperationId> = state.unsaved.iter().copied().collect();
        for id in unsaved {
            if let Some(record) = state.records.iter().find(|r| r.id() == id) {
                self.store.save(record).await?;
            }
            state.unsaved.remove(&id);
            applied += 1;
        }

        if applied > 0 {
            tracing::info!("{}: checkpoint wrote {} deferred change(s)", self.name, applied);
        }
        Ok(applied)
    }

    /// Number of changes only held in memory.
    pub async fn dirty_count(&self) -> usize {
        let state = self.state.lock().await;
        state.unsaved.len() + state.unremoved.len()
    }

    pub fn set_progress(&self, id: OperationId, percent: u8) {
        self.progress_map().insert(id, percent.min(100));
    }

    pub fn progress(&self, id: OperationId) -> Option<u8> {
        self.progress_map().get(&id).copied()
    }

    pub fn clear_progress(&self, id: OperationId) {
        self.progress_map().remove(&id);
    }

    /// Progress of every transfer currently reported.
    pub fn uploads(&self) -> Vec<UploadProgress> {
        let mut uploads: Vec<UploadProgress> = self
            .progress_map()
            .iter()
            .map(|(id, percent)| UploadProgress {
                id: *id,
                percent: *percent,
            })
            .collect();
        uploads.sort_by_key(|u| u.id.as_uuid());
        uploads
    }

    async fn failed_ids(&self) -> Vec<OperationId> {
        self.list(&QueueFilter::failed())
            .await
            .iter()
            .map(|r| r.id())
            .collect()
    }

    async fn transition<F>(
        &self,
        id: OperationId,
        allowed: &[OperationStatus],
        to: OperationStatus,
        change: F,
    ) -> Result<T, QueueError>
    where
        F: FnOnce(&mut crate::models::Delivery),
    {
        let mut state = self.state.lock().await;
        let index = Self::position(&state, id)?;

        let from = state.records[index].delivery().status;
        if !allowed.contains(&from) {
            return Err(QueueError::InvalidTransition { id, from, to });
        }

        change(state.records[index].delivery_mut());
        let record = state.records[index].clone();
        self.persist(&mut state, id).await;
        Ok(record)
    }

    fn position(state: &QueueState<T>, id: OperationId) -> Result<usize, QueueError> {
        state
            .records
            .iter()
            .position(|r| r.id() == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn expect_status(record: &T, expected: OperationStatus, to: OperationStatus) -> Result<(), QueueError> {
        let from = record.delivery().status;
        if from == expected {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                id: record.id(),
                from,
                to,
            })
        }
    }

    async fn persist(&self, state: &mut QueueState<T>, id: OperationId) {
        let Some(record) = state.records.iter().find(|r| r.id() == id) else {
            return;
        };

        match self.store.save(record).await {
            Ok(()) => {
                state.unsaved.remove(&id);
            }
            Err(e) => {
                tracing::warn!(
                    "{}: keeping {} in memory only, storage write failed: {}",
                    self.name,
                    id,
                    e
                );
                state.unsaved.insert(id);
            }
        }
    }

    async fn forget(&self, state: &mut QueueState<T>, id: OperationId) {
        state.unsaved.remove(&id);
        self.clear_progress(id);

        if let Err(e) = self.store.remove(id).await {
            tracing::warn!(
                "{}: removal of {} deferred, storage write failed: {}",
                self.name,
                id,
                e
            );
            state.unremoved.insert(id);
        }
    }

    fn progress_map(&self) -> std::sync::MutexGuard<'_, HashMap<OperationId, u8>> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ImageQueue {
    /// Remembers the remote URL of an uploaded binary.
    pub async fn record_upload(&self, id: OperationId, url: &str) -> Result<PendingImage, QueueError> {
        let url = url.to_string();
        self.modify(id, move |image| image.uploaded_url = Some(url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageTarget, NewImageUpload, NewOperation, OperationKind};
    use crate::store::MemoryQueueStore;

    async fn open_log(store: &MemoryQueueStore<PendingOperation>) -> OperationLog {
        Queue::open("operations", Arc::new(store.clone())).await.unwrap()
    }

    fn point_update(id: &str, name: &str) -> NewOperation {
        NewOperation::new(
            EntityType::Point,
            OperationKind::Update,
            id,
            serde_json::json!({ "name": name }),
        )
    }

    #[tokio::test]
    async fn test_append_assigns_identity_and_order() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        let first = log.append(NewOperation::add_favorite("42")).await;
        let second = log.append(NewOperation::remove_favorite("42")).await;

        assert_ne!(first.id, second.id);
        assert!(second.sequence > first.sequence);
        assert!(second.created_at >= first.created_at);
        assert_eq!(first.status(), OperationStatus::Pending);
        assert_eq!(store.len(), 2);

        let listed = log.list(&QueueFilter::all()).await;
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        let fav = log.append(NewOperation::add_favorite("42")).await;
        let point = log.append(point_update("LI4", "Hegu")).await;
        log.mark_in_flight(point.id).await.unwrap();
        log.mark_failed(point.id, "HTTP 422").await.unwrap();

        let pending = log.list(&QueueFilter::pending()).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fav.id);

        let failed = log.list(&QueueFilter::failed()).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error(), Some("HTTP 422"));

        let favorites = log.list(&QueueFilter::all().entity(EntityType::Favorite)).await;
        assert_eq!(favorites.len(), 1);
    }

    #[tokio::test]
    async fn test_one_in_flight_per_target() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        let first = log.append(point_update("LI4", "a")).await;
        let second = log.append(point_update("LI4", "b")).await;
        let other = log.append(point_update("ST36", "c")).await;

        log.mark_in_flight(first.id).await.unwrap();
        assert!(log.conflicting_in_flight(&first.target()).await);

        let err = log.mark_in_flight(second.id).await.unwrap_err();
        assert!(matches!(err, QueueError::TargetBusy { .. }));

        // A different target is not blocked.
        log.mark_in_flight(other.id).await.unwrap();

        log.mark_done(first.id).await.unwrap();
        assert!(!log.conflicting_in_flight(&first.target()).await);
        log.mark_in_flight(second.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_done_removes_record() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        let op = log.append(NewOperation::add_favorite("42")).await;
        let in_flight = log.mark_in_flight(op.id).await.unwrap();
        assert_eq!(in_flight.attempt_count(), 1);
        assert!(in_flight.delivery.last_attempt.is_some());

        log.mark_done(op.id).await.unwrap();
        assert!(log.get(op.id).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;
        let op = log.append(NewOperation::add_favorite("42")).await;

        let err = log.mark_done(op.id).await.unwrap_err();
        assert_eq!(
            err,
            QueueError::InvalidTransition {
                id: op.id,
                from: OperationStatus::Pending,
                to: OperationStatus::Done,
            }
        );

        assert!(log.reset(op.id).await.is_err());
        assert!(log.discard(op.id).await.is_err());

        let unknown = OperationId::new();
        assert_eq!(
            log.mark_in_flight(unknown).await.unwrap_err(),
            QueueError::NotFound(unknown)
        );
    }

    #[tokio::test]
    async fn test_retry_reset_and_discard() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;
        let op = log.append(NewOperation::add_favorite("42")).await;

        log.mark_in_flight(op.id).await.unwrap();
        let retried = log.mark_retry(op.id, "HTTP 503").await.unwrap();
        assert_eq!(retried.status(), OperationStatus::Pending);
        assert_eq!(retried.attempt_count(), 1);

        let second = log.mark_in_flight(op.id).await.unwrap();
        assert_eq!(second.attempt_count(), 2);
        let released = log.release(op.id).await.unwrap();
        assert_eq!(released.status(), OperationStatus::Pending);
        assert_eq!(released.attempt_count(), 1);
        assert_eq!(released.last_error(), Some("HTTP 503"));

        log.mark_in_flight(op.id).await.unwrap();
        log.mark_failed(op.id, "HTTP 503").await.unwrap();
        assert_eq!(log.counts().await.failed, 1);

        let reset = log.reset(op.id).await.unwrap();
        assert_eq!(reset.status(), OperationStatus::Pending);
        assert_eq!(reset.attempt_count(), 0);
        assert!(reset.last_error().is_none());

        log.mark_in_flight(op.id).await.unwrap();
        log.mark_failed(op.id, "HTTP 400").await.unwrap();
        log.discard(op.id).await.unwrap();
        assert!(log.is_empty().await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_reset_and_discard() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        for point in ["1", "2", "3"] {
            let op = log.append(NewOperation::add_favorite(point)).await;
            log.mark_failed(op.id, "HTTP 400").await.unwrap();
        }

        assert_eq!(log.reset_failed().await.len(), 3);
        assert_eq!(log.counts().await.pending, 3);

        for op in log.list(&QueueFilter::pending()).await {
            log.mark_failed(op.id, "HTTP 400").await.unwrap();
        }
        assert_eq!(log.discard_failed().await, 3);
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_reload_reproduces_queue() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;

        let mut appended = Vec::new();
        appended.push(log.append(NewOperation::add_favorite("42")).await);
        appended.push(log.append(point_update("LI4", "Hegu")).await);
        appended.push(log.append(NewOperation::remove_favorite("42")).await);
        drop(log);

        let reopened = open_log(&store).await;
        assert_eq!(reopened.list(&QueueFilter::all()).await, appended);

        let next = reopened.append(NewOperation::add_favorite("7")).await;
        assert_eq!(next.sequence, appended[2].sequence + 1);
    }

    #[tokio::test]
    async fn test_reopen_releases_in_flight() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;
        let op = log.append(NewOperation::add_favorite("42")).await;
        log.mark_in_flight(op.id).await.unwrap();
        drop(log);

        let reopened = open_log(&store).await;
        let restored = reopened.get(op.id).await.unwrap();
        assert_eq!(restored.status(), OperationStatus::Pending);
        assert_eq!(restored.attempt_count(), 1);
        assert_eq!(
            store.get(op.id).unwrap().status(),
            OperationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_storage_failure_is_deferred_to_checkpoint() {
        let store = MemoryQueueStore::new();
        let log = open_log(&store).await;
        let kept = log.append(NewOperation::add_favorite("1")).await;

        store.set_unavailable(true);
        let op = log.append(NewOperation::add_favorite("42")).await;
        assert_eq!(log.counts().await.pending, 2);
        assert!(store.get(op.id).is_none());

        log.mark_in_flight(kept.id).await.unwrap();
        log.mark_done(kept.id).await.unwrap();
        assert_eq!(log.dirty_count().await, 2);
        assert!(log.checkpoint().await.is_err());

        store.set_unavailable(false);
        assert_eq!(log.checkpoint().await.unwrap(), 2);
        assert_eq!(log.dirty_count().await, 0);
        assert!(store.get(op.id).is_some());
        assert!(store.get(kept.id).is_none());
    }

    #[tokio::test]
    async fn test_image_queue_upload_bookkeeping() {
        let store = MemoryQueueStore::new();
        let images: ImageQueue = Queue::open("images", Arc::new(store.clone())).await.unwrap();

        let image = images
            .append(NewImageUpload::new(ImageTarget::Profile, "/tmp/me.png"))
            .await;
        assert_eq!(image.entity_type, EntityType::ProfileImage);
        assert_eq!(image.target_id, "me");

        images.set_progress(image.id, 140);
        assert_eq!(images.progress(image.id), Some(100));
        assert_eq!(images.uploads().len(), 1);

        let updated = images
            .record_upload(image.id, "https://cdn.example.com/me.png")
            .await
            .unwrap();
        assert_eq!(
            updated.uploaded_url.as_deref(),
            Some("https://cdn.example.com/me.png")
        );
        assert_eq!(store.get(image.id).unwrap().uploaded_url, updated.uploaded_url);

        images.mark_in_flight(image.id).await.unwrap();
        images.mark_done(image.id).await.unwrap();
        assert!(images.uploads().is_empty());
    }
}
