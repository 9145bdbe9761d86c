//! The sync engine: drains both queues against the remote API.
//!
//! A pass groups pending records into lanes, one lane per target key. Records
//! inside a lane go out strictly in queue order, each retried with backoff
//! until it succeeds, is rejected, or runs out of attempts. Lanes run
//! concurrently up to [`EngineSettings::concurrency`]. JSON operations drain
//! first, then images.

mod backoff;

#[cfg(test)]
mod tests;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::api::{ApiError, ProgressFn, RemoteApi};
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::models::{OperationId, PendingImage, PendingOperation, TargetKey};
use crate::queue::{ImageQueue, OperationLog, Queue, QueueError, QueueFilter, QueueRecord};
use crate::reconcile::LocalReconciler;
use crate::status::{QueueView, StatusStore};
use crate::store::MetaStore;

pub use backoff::RetryPolicy;

/// Tunables for a [`SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub operation_policy: RetryPolicy,
    pub image_policy: RetryPolicy,
    /// Maximum number of lanes dispatching at once.
    pub concurrency: usize,
    /// Upper bound for one delivery attempt, including image upload and attach.
    pub attempt_timeout: Duration,
}

impl EngineSettings {
    pub const DEFAULT_CONCURRENCY: usize = 4;
    pub const MAX_CONCURRENCY: usize = 16;
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, Self::MAX_CONCURRENCY);
        self
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            operation_policy: RetryPolicy::operations(),
            image_policy: RetryPolicy::images(),
            concurrency: Self::DEFAULT_CONCURRENCY,
            attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::AlreadyRunning => write!(f, "a sync pass is already running"),
        }
    }
}

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Records sent at least once.
    pub dispatched: usize,
    /// JSON operations confirmed by the server.
    pub succeeded: usize,
    /// Images uploaded and attached.
    pub images_uploaded: usize,
    /// Records that ended the pass as failed.
    pub failed: Vec<OperationId>,
    /// Attempts that failed and were retried.
    pub retries: usize,
    /// Records skipped because their target was already in flight elsewhere.
    pub deferred: usize,
    /// The pass stopped early because connectivity was lost.
    pub interrupted: bool,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.images_uploaded += other.images_uploaded;
        self.failed.extend(other.failed);
        self.retries += other.retries;
        self.deferred += other.deferred;
        self.interrupted |= other.interrupted;
    }
}

/// Result of [`SyncEngine::process_sync_queue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    Skipped { reason: SkipReason },
    Completed(SyncReport),
}

impl PassOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            PassOutcome::Skipped { .. } => None,
        }
    }
}

/// Collaborators the engine works with.
pub struct EngineParts {
    pub operations: Arc<OperationLog>,
    pub images: Arc<ImageQueue>,
    pub api: Arc<dyn RemoteApi>,
    pub connectivity: ConnectivityMonitor,
    pub meta: Arc<dyn MetaStore>,
    pub status: Arc<StatusStore>,
    pub reconciler: Arc<dyn LocalReconciler>,
}

/// How one record's delivery ended.
enum Delivered {
    Done,
    Failed,
    Interrupted,
    Skipped,
}

/// Drains the operation log and the image queue.
pub struct SyncEngine {
    operations: Arc<OperationLog>,
    images: Arc<ImageQueue>,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    meta: Arc<dyn MetaStore>,
    status: Arc<StatusStore>,
    reconciler: Arc<dyn LocalReconciler>,
    settings: EngineSettings,
    running: AtomicBool,
    refresh_lock: Mutex<()>,
    went_offline: Arc<Notify>,
    _offline_watch: Subscription,
}

impl SyncEngine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        let went_offline = Arc::new(Notify::new());
        let notify = Arc::clone(&went_offline);
        let offline_watch = parts.connectivity.subscribe(move |online| {
            if !online {
                notify.notify_waiters();
            }
        });

        Self {
            operations: parts.operations,
            images: parts.images,
            api: parts.api,
            connectivity: parts.connectivity,
            meta: parts.meta,
            status: parts.status,
            reconciler: parts.reconciler,
            settings: {
                let concurrency = settings.concurrency;
                settings.with_concurrency(concurrency)
            },
            running: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            went_offline,
            _offline_watch: offline_watch,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one sync pass.
    ///
    /// Returns immediately when offline or when a pass is already running.
    /// Individual delivery failures are recorded on the records and in the
    /// report; they never abort the pass.
    pub async fn process_sync_queue(&self) -> PassOutcome {
        if !self.connectivity.status() {
            tracing::debug!("Sync pass skipped: offline");
            return PassOutcome::Skipped {
                reason: SkipReason::Offline,
            };
        }

        let Some(_guard) = PassGuard::acquire(&self.running, &self.status) else {
            tracing::debug!("Sync pass skipped: already running");
            return PassOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            };
        };

        self.status.update(|s| s.sync_in_progress = true);
        tracing::info!("Sync pass started");

        for (name, result) in [
            (self.operations.name(), self.operations.checkpoint().await),
            (self.images.name(), self.images.checkpoint().await),
        ] {
            if let Err(e) = result {
                tracing::warn!("{}: checkpoint failed, continuing in memory: {}", name, e);
            }
        }
        self.refresh_status().await;

        let mut report = self.drain_operations().await;
        if !report.interrupted {
            report.merge(self.drain_images().await);
        }

        let last_sync = if report.interrupted {
            None
        } else {
            let now = Utc::now();
            if let Err(e) = self.meta.save_last_sync(now).await {
                tracing::warn!("Failed to store last sync time: {}", e);
            }
            Some(now)
        };

        {
            let _order = self.refresh_lock.lock().await;
            let view = QueueView::capture(&self.operations, &self.images).await;
            self.status.finish_pass(view, report.dispatched, last_sync);
        }

        tracing::info!(
            "Sync pass finished: {} dispatched, {} ok, {} images, {} failed, {} retries{}",
            report.dispatched,
            report.succeeded,
            report.images_uploaded,
            report.failed.len(),
            report.retries,
            if report.interrupted { " (interrupted)" } else { "" }
        );
        PassOutcome::Completed(report)
    }

    /// Recomputes the status counts from the queues.
    ///
    /// Views are applied in the order they were captured, so a slow refresh
    /// never overwrites the counts of a newer one.
    pub async fn refresh_status(&self) {
        let _order = self.refresh_lock.lock().await;
        let view = QueueView::capture(&self.operations, &self.images).await;
        self.status.apply_view(view);
    }

    async fn drain_operations(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        // Records appended while a round runs are picked up by the next round.
        loop {
            let pending: Vec<PendingOperation> = self
                .operations
                .list(&QueueFilter::pending())
                .await
                .into_iter()
                .filter(|op| seen.insert(op.id))
                .collect();
            if pending.is_empty() {
                break;
            }

            let lanes = into_lanes(pending);
            tracing::debug!("Dispatching operations in {} lane(s)", lanes.len());

            let results: Vec<SyncReport> = stream::iter(lanes)
                .map(|lane| self.run_operation_lane(lane))
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;
            for lane in results {
                report.merge(lane);
            }

            if report.interrupted {
                break;
            }
        }

        report
    }

    async fn drain_images(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        loop {
            let pending: Vec<PendingImage> = self
                .images
                .list(&QueueFilter::pending())
                .await
                .into_iter()
                .filter(|image| seen.insert(image.id))
                .collect();
            if pending.is_empty() {
                break;
            }

            let results: Vec<SyncReport> = stream::iter(into_lanes(pending))
                .map(|lane| self.run_image_lane(lane))
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;
            for lane in results {
                report.merge(lane);
            }

            if report.interrupted {
                break;
            }
        }

        report
    }

    async fn run_operation_lane(&self, lane: Vec<PendingOperation>) -> SyncReport {
        let mut report = SyncReport::default();
        for op in lane {
            if let Delivered::Interrupted = self.deliver_operation(op.id, &mut report).await {
                report.interrupted = true;
                break;
            }
        }
        report
    }

    async fn run_image_lane(&self, lane: Vec<PendingImage>) -> SyncReport {
        let mut report = SyncReport::default();
        for image in lane {
            if let Delivered::Interrupted = self.deliver_image(image.id, &mut report).await {
                report.interrupted = true;
                break;
            }
        }
        report
    }

    async fn deliver_operation(&self, id: OperationId, report: &mut SyncReport) -> Delivered {
        let policy = self.settings.operation_policy;
        let mut first = true;

        loop {
            let op = match self.claim(self.operations.as_ref(), id, report).await {
                Ok(op) => op,
                Err(end) => return end,
            };
            if first {
                report.dispatched += 1;
                first = false;
            }
            tracing::debug!("Dispatching {} (attempt {})", op, op.attempt_count());

            let result = self.attempt(self.api.dispatch(&op)).await;
            let error = match result {
                Ok(()) => {
                    self.settle(self.operations.mark_done(id).await);
                    report.succeeded += 1;
                    self.reconcile_outcome(&op, None).await;
                    self.refresh_status().await;
                    return Delivered::Done;
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::warn!("{} rejected: {}", op, error);
                self.settle(self.operations.mark_failed(id, error.to_string()).await);
                report.failed.push(id);
                self.reconcile_outcome(&op, Some(&error)).await;
                self.refresh_status().await;
                return Delivered::Failed;
            }

            if let Some(end) = self
                .after_retryable(self.operations.as_ref(), &op, policy, error, report)
                .await
            {
                return end;
            }
        }
    }

    async fn deliver_image(&self, id: OperationId, report: &mut SyncReport) -> Delivered {
        let policy = self.settings.image_policy;
        let mut first = true;

        loop {
            let image = match self.claim(self.images.as_ref(), id, report).await {
                Ok(image) => image,
                Err(end) => return end,
            };
            if first {
                report.dispatched += 1;
                first = false;
            }
            tracing::debug!("Uploading {} (attempt {})", image, image.delivery.attempt_count);

            let result = self.attempt(self.upload_and_attach(&image)).await;
            self.images.clear_progress(id);

            let error = match result {
                Ok(url) => {
                    self.settle(self.images.mark_done(id).await);
                    report.images_uploaded += 1;
                    if let Err(e) = self.reconciler.image_confirmed(&image, &url).await {
                        tracing::error!("Local image update failed for {}: {}", image.id, e);
                    }
                    self.refresh_status().await;
                    return Delivered::Done;
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::warn!("{} rejected: {}", image, error);
                self.settle(self.images.mark_failed(id, error.to_string()).await);
                report.failed.push(id);
                self.refresh_status().await;
                return Delivered::Failed;
            }

            if let Some(end) = self
                .after_retryable(self.images.as_ref(), &image, policy, error, report)
                .await
            {
                return end;
            }
        }
    }

    /// Hands a final outcome to the reconciler, unless a newer record for the
    /// same target is still queued. Local state already reflects that newer
    /// change and its own outcome will settle the target.
    async fn reconcile_outcome(&self, op: &PendingOperation, rejection: Option<&ApiError>) {
        if self.superseded(op).await {
            tracing::debug!("{} superseded by a newer change, leaving local state", op);
            return;
        }

        let result = match rejection {
            None => self.reconciler.operation_confirmed(op).await,
            Some(error) => self.reconciler.operation_rejected(op, error).await,
        };
        if let Err(e) = result {
            tracing::error!("Local reconcile failed for {}: {}", op.id, e);
        }
    }

    async fn superseded(&self, op: &PendingOperation) -> bool {
        let target = op.target();
        self.operations
            .list(&QueueFilter::active())
            .await
            .iter()
            .any(|other| other.sequence > op.sequence && other.target() == target)
    }

    /// Uploads the binary unless an earlier attempt already did, then attaches it.
    async fn upload_and_attach(&self, image: &PendingImage) -> Result<String, ApiError> {
        let url = match &image.uploaded_url {
            Some(url) => url.clone(),
            None => {
                let url = self
                    .api
                    .upload_image(image, self.progress_reporter(image.id))
                    .await?;
                if let Err(e) = self.images.record_upload(image.id, &url).await {
                    tracing::debug!("Upload of {} finished for a removed record: {}", image.id, e);
                }
                url
            }
        };

        self.api.attach_image(image, &url).await?;
        Ok(url)
    }

    fn progress_reporter(&self, id: OperationId) -> ProgressFn {
        let images = Arc::clone(&self.images);
        let status = Arc::clone(&self.status);
        Arc::new(move |percent| {
            images.set_progress(id, percent);
            let uploads = images.uploads();
            status.update(|s| s.uploads = uploads);
        })
    }

    /// Moves a pending record in flight, stopping if connectivity is gone.
    async fn claim<T: QueueRecord>(
        &self,
        queue: &Queue<T>,
        id: OperationId,
        report: &mut SyncReport,
    ) -> Result<T, Delivered> {
        if !self.connectivity.status() {
            return Err(Delivered::Interrupted);
        }

        let record = match queue.mark_in_flight(id).await {
            Ok(record) => record,
            Err(QueueError::TargetBusy { target, .. }) => {
                tracing::debug!("Deferring {}: {} is busy", id, target);
                report.deferred += 1;
                return Err(Delivered::Skipped);
            }
            Err(e) => {
                // Reset, discarded or failed by the user since the pass started.
                tracing::debug!("Skipping {}: {}", id, e);
                return Err(Delivered::Skipped);
            }
        };

        if !self.connectivity.status() {
            self.settle(queue.release(id).await);
            return Err(Delivered::Interrupted);
        }

        self.refresh_status().await;
        Ok(record)
    }

    /// Records a retryable failure, then either parks the record or waits out
    /// the backoff. `None` means the record should be tried again.
    async fn after_retryable<T: QueueRecord + fmt::Display>(
        &self,
        queue: &Queue<T>,
        record: &T,
        policy: RetryPolicy,
        error: ApiError,
        report: &mut SyncReport,
    ) -> Option<Delivered> {
        let id = record.id();
        let attempts = record.delivery().attempt_count;

        if policy.exhausted(attempts) {
            tracing::warn!(
                "{} failed after {} attempt(s): {}",
                record,
                attempts,
                error
            );
            self.settle(queue.mark_failed(id, error.to_string()).await);
            report.failed.push(id);
            self.refresh_status().await;
            return Some(Delivered::Failed);
        }

        let delay = policy.delay_after(attempts);
        tracing::warn!(
            "{} attempt {} failed, retrying in {:?}: {}",
            record,
            attempts,
            delay,
            error
        );
        self.settle(queue.mark_retry(id, error.to_string()).await);
        report.retries += 1;
        self.refresh_status().await;

        if self.wait_online(delay).await {
            None
        } else {
            Some(Delivered::Interrupted)
        }
    }

    /// Sleeps for `delay`. Returns false as soon as connectivity is lost.
    async fn wait_online(&self, delay: Duration) -> bool {
        let went_offline = self.went_offline.notified();
        tokio::pin!(went_offline);
        went_offline.as_mut().enable();

        if !self.connectivity.status() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => self.connectivity.status(),
            _ = went_offline => false,
        }
    }

    async fn attempt<T, F>(&self, call: F) -> Result<T, ApiError>
    where
        F: std::future::Future<Output = Result<T, ApiError>>,
    {
        tokio::time::timeout(self.settings.attempt_timeout, call)
            .await
            .unwrap_or(Err(ApiError::Timeout))
    }

    /// Logs a transition that lost a race with a user action.
    fn settle<T>(&self, result: Result<T, QueueError>) {
        if let Err(e) = result {
            tracing::debug!("Queue transition skipped: {}", e);
        }
    }
}

/// Groups records by target, keeping queue order inside each group and
/// ordering groups by their oldest record.
fn into_lanes<T: QueueRecord>(records: Vec<T>) -> Vec<Vec<T>> {
    let mut index: HashMap<TargetKey, usize> = HashMap::new();
    let mut lanes: Vec<Vec<T>> = Vec::new();

    for record in records {
        let target = record.target();
        match index.get(&target) {
            Some(&i) => lanes[i].push(record),
            None => {
                index.insert(target, lanes.len());
                lanes.push(vec![record]);
            }
        }
    }

    lanes
}

/// Clears the running flag and the in-progress banner, even on panic.
struct PassGuard<'a> {
    running: &'a AtomicBool,
    status: &'a StatusStore,
}

impl<'a> PassGuard<'a> {
    fn acquire(running: &'a AtomicBool, status: &'a StatusStore) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { running, status })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.status.update(|s| s.sync_in_progress = false);
        self.running.store(false, Ordering::SeqCst);
    }
}
