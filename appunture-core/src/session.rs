//! App-session facade over the queues, the engine and the status store.
//!
//! A [`SyncSession`] is built once at startup and shut down on logout or exit.
//! In background mode it owns a scheduler task that runs a pass whenever
//! connectivity comes back, when asked to, and on an optional periodic tick.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::api::RemoteApi;
use crate::connectivity::{ConnectivityMonitor, NetworkProbe, StaticProbe, Subscription};
use crate::engine::{EngineParts, EngineSettings, PassOutcome, SkipReason, SyncEngine};
use crate::error::SyncError;
use crate::favorites::FavoritesSnapshot;
use crate::models::{
    EntityType, NewImageUpload, NewOperation, OperationId, PendingImage, PendingOperation,
};
use crate::queue::{ImageQueue, OperationLog, Queue, QueueError, QueueFilter};
use crate::reconcile::{LocalReconciler, NoopReconciler};
use crate::status::{StatusStore, SyncStatus};
use crate::store::{FileMetaStore, FileQueueStore, MetaStore, QueueStore};

/// Configures and starts a [`SyncSession`].
pub struct SyncSessionBuilder {
    api: Arc<dyn RemoteApi>,
    operation_store: Arc<dyn QueueStore<PendingOperation>>,
    image_store: Arc<dyn QueueStore<PendingImage>>,
    meta: Arc<dyn MetaStore>,
    probe: Arc<dyn NetworkProbe>,
    reconciler: Arc<dyn LocalReconciler>,
    connectivity: ConnectivityMonitor,
    settings: EngineSettings,
    background: bool,
    sync_on_start: bool,
    tick_interval: Option<Duration>,
}

impl SyncSessionBuilder {
    pub fn probe(mut self, probe: Arc<dyn NetworkProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn LocalReconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs passes from a scheduler task. Off for one-shot callers.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Checks connectivity and runs a pass right after start.
    pub fn sync_on_start(mut self, sync_on_start: bool) -> Self {
        self.sync_on_start = sync_on_start;
        self
    }

    /// Periodic pass interval. Only used in background mode.
    pub fn tick_interval(mut self, tick_interval: Option<Duration>) -> Self {
        self.tick_interval = tick_interval.filter(|interval| !interval.is_zero());
        self
    }

    /// Opens both queues and starts the session.
    pub async fn start(self) -> Result<SyncSession, SyncError> {
        let operations: Arc<OperationLog> =
            Arc::new(Queue::open("operations", self.operation_store).await?);
        let images: Arc<ImageQueue> = Arc::new(Queue::open("images", self.image_store).await?);

        let status = Arc::new(StatusStore::new(SyncStatus {
            is_online: self.connectivity.status(),
            ..SyncStatus::default()
        }));

        let engine = SyncEngine::new(
            EngineParts {
                operations: operations.clone(),
                images: images.clone(),
                api: self.api.clone(),
                connectivity: self.connectivity.clone(),
                meta: self.meta.clone(),
                status: status.clone(),
                reconciler: self.reconciler,
            },
            self.settings,
        );

        let shared = Arc::new(Shared {
            engine,
            operations,
            images,
            status,
            connectivity: self.connectivity,
            probe: self.probe,
            api: self.api,
            meta: self.meta,
            trigger: Notify::new(),
            background: self.background,
        });

        if let Err(e) = shared.load_last_sync().await {
            tracing::warn!("Could not load last sync time: {}", e);
        }
        shared.engine.refresh_status().await;

        let watcher = {
            let weak = Arc::downgrade(&shared);
            shared.connectivity.subscribe(move |online| {
                if let Some(shared) = weak.upgrade() {
                    shared.status.update(|s| s.is_online = online);
                    if online {
                        shared.request_pass();
                    }
                }
            })
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = if self.background {
            let interval = self.tick_interval.map(|period| {
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            Some(tokio::spawn(run_scheduler(
                shared.clone(),
                interval,
                shutdown_rx,
            )))
        } else {
            None
        };

        let session = SyncSession {
            shared,
            watcher: Mutex::new(Some(watcher)),
            scheduler: Mutex::new(scheduler),
            shutdown,
        };

        if self.sync_on_start {
            session.check_connection().await;
            session.shared.request_pass();
        }

        tracing::debug!(
            "Sync session started (background: {}, online: {})",
            self.background,
            session.shared.connectivity.status()
        );
        Ok(session)
    }
}

struct Shared {
    engine: SyncEngine,
    operations: Arc<OperationLog>,
    images: Arc<ImageQueue>,
    status: Arc<StatusStore>,
    connectivity: ConnectivityMonitor,
    probe: Arc<dyn NetworkProbe>,
    api: Arc<dyn RemoteApi>,
    meta: Arc<dyn MetaStore>,
    trigger: Notify,
    background: bool,
}

impl Shared {
    /// Consults the platform signal, then the API health endpoint.
    async fn check_connection(&self) -> bool {
        let signal = match self.probe.is_connected().await {
            Ok(true) => match self.api.health_check().await {
                Ok(()) => Ok(true),
                Err(e) => {
                    tracing::debug!("Health check failed: {}", e);
                    Ok(false)
                }
            },
            other => other,
        };
        let online = self.connectivity.report(signal);
        self.status.update(|s| s.is_online = online);
        online
    }

    async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let last_sync = self.meta.load_last_sync().await?;
        self.status.update(|s| s.last_sync = last_sync);
        Ok(last_sync)
    }

    fn request_pass(&self) {
        if self.background {
            self.trigger.notify_one();
        }
    }
}

async fn run_scheduler(
    shared: Arc<Shared>,
    mut interval: Option<Interval>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = shared.trigger.notified() => {}
            _ = next_tick(&mut interval) => {
                tracing::debug!("Periodic sync tick");
                if !shared.check_connection().await {
                    continue;
                }
            }
        }

        if let PassOutcome::Skipped { reason } = shared.engine.process_sync_queue().await {
            tracing::debug!("Scheduled pass skipped: {}", reason);
        }
    }
    tracing::debug!("Sync scheduler stopped");
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The sync state container for one app session.
pub struct SyncSession {
    shared: Arc<Shared>,
    watcher: Mutex<Option<Subscription>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SyncSession {
    pub fn builder(
        api: Arc<dyn RemoteApi>,
        operation_store: Arc<dyn QueueStore<PendingOperation>>,
        image_store: Arc<dyn QueueStore<PendingImage>>,
        meta: Arc<dyn MetaStore>,
    ) -> SyncSessionBuilder {
        SyncSessionBuilder {
            api,
            operation_store,
            image_store,
            meta,
            probe: Arc::new(StaticProbe(true)),
            reconciler: Arc::new(NoopReconciler),
            connectivity: ConnectivityMonitor::new(),
            settings: EngineSettings::default(),
            background: true,
            sync_on_start: true,
            tick_interval: None,
        }
    }

    /// Builder over the file-backed stores, laid out under `dir` as
    /// `operations/`, `images/` and `meta/`.
    pub fn on_disk(api: Arc<dyn RemoteApi>, dir: impl AsRef<Path>) -> SyncSessionBuilder {
        let dir = dir.as_ref();
        Self::builder(
            api,
            Arc::new(FileQueueStore::<PendingOperation>::new(dir.join("operations"))),
            Arc::new(FileQueueStore::<PendingImage>::new(dir.join("images"))),
            Arc::new(FileMetaStore::new(dir.join("meta"))),
        )
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.shared.connectivity
    }

    pub fn operations(&self) -> &OperationLog {
        &self.shared.operations
    }

    pub fn images(&self) -> &ImageQueue {
        &self.shared.images
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Refreshes the online flag. Returns whether the server is reachable.
    pub async fn check_connection(&self) -> bool {
        self.shared.check_connection().await
    }

    /// Runs a pass unless one is running or the device is offline.
    pub async fn process_sync_queue(&self) -> PassOutcome {
        self.shared.engine.process_sync_queue().await
    }

    /// Checks connectivity and runs a full pass, waiting out a running one.
    pub async fn sync_all(&self) -> Result<PassOutcome, SyncError> {
        if !self.check_connection().await {
            return Err(SyncError::Offline);
        }

        let mut status = self.subscribe();
        loop {
            match self.process_sync_queue().await {
                PassOutcome::Skipped {
                    reason: SkipReason::AlreadyRunning,
                } => {
                    if status.wait_for(|s| !s.sync_in_progress).await.is_err() {
                        return Err(SyncError::ShutDown);
                    }
                    tokio::task::yield_now().await;
                }
                PassOutcome::Skipped {
                    reason: SkipReason::Offline,
                } => return Err(SyncError::Offline),
                outcome => return Ok(outcome),
            }
        }
    }

    /// Fetches the server's favorites and notes which points still have a
    /// toggle queued. Meant to run right after a drain.
    pub async fn fetch_favorites(&self) -> Result<FavoritesSnapshot, SyncError> {
        let remote = self.shared.api.fetch_favorites().await?;
        let pending = self
            .shared
            .operations
            .list(&QueueFilter::active().entity(EntityType::Favorite))
            .await
            .into_iter()
            .map(|op| op.target_id)
            .collect();

        Ok(FavoritesSnapshot {
            remote: remote.into_iter().collect(),
            pending,
        })
    }

    pub fn acknowledge_notification(&self) {
        self.shared.status.acknowledge_notification();
    }

    pub async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        self.shared.load_last_sync().await
    }

    /// Queues a JSON mutation. The optimistic local change is the caller's.
    pub async fn enqueue(&self, operation: NewOperation) -> PendingOperation {
        let op = self.shared.operations.append(operation).await;
        tracing::info!("Queued {}", op);
        self.after_change().await;
        op
    }

    /// Queues an image upload.
    pub async fn enqueue_image(&self, upload: NewImageUpload) -> PendingImage {
        let image = self.shared.images.append(upload).await;
        tracing::info!("Queued {}", image);
        self.after_change().await;
        image
    }

    /// Puts a failed operation or image back in line.
    pub async fn retry_failed(&self, id: OperationId) -> Result<(), SyncError> {
        match self.shared.operations.reset(id).await {
            Ok(_) => {}
            Err(QueueError::NotFound(_)) => {
                self.shared.images.reset(id).await?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!("Retrying {}", id);
        self.after_change().await;
        Ok(())
    }

    /// Puts every failed record back in line. Returns how many were reset.
    pub async fn retry_all_failed(&self) -> usize {
        let count = self.shared.operations.reset_failed().await.len()
            + self.shared.images.reset_failed().await.len();
        if count > 0 {
            tracing::info!("Retrying {} failed record(s)", count);
            self.after_change().await;
        }
        count
    }

    /// Drops one failed operation or image.
    pub async fn discard_failed(&self, id: OperationId) -> Result<(), SyncError> {
        match self.shared.operations.discard(id).await {
            Ok(_) => {}
            Err(QueueError::NotFound(_)) => {
                self.shared.images.discard(id).await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.shared.engine.refresh_status().await;
        Ok(())
    }

    /// Drops every failed record. Returns how many were removed.
    pub async fn clear_failed(&self) -> usize {
        let count = self.shared.operations.discard_failed().await
            + self.shared.images.discard_failed().await;
        if count > 0 {
            tracing::info!("Discarded {} failed record(s)", count);
        }
        self.shared.engine.refresh_status().await;
        count
    }

    /// Writes changes storage rejected earlier.
    pub async fn checkpoint(&self) -> Result<(), SyncError> {
        self.shared.operations.checkpoint().await?;
        self.shared.images.checkpoint().await?;
        Ok(())
    }

    /// Stops background work and flushes both queues.
    pub async fn shutdown(self) -> Result<(), SyncError> {
        self.stop_background();
        let scheduler = lock(&self.scheduler).take();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                tracing::warn!("Sync scheduler ended abnormally: {}", e);
            }
        }

        let result = self.checkpoint().await;
        tracing::debug!("Sync session shut down");
        result
    }

    async fn after_change(&self) {
        self.shared.engine.refresh_status().await;
        if self.shared.connectivity.status() {
            self.shared.request_pass();
        }
    }

    fn stop_background(&self) {
        lock(&self.watcher).take();
        let _ = self.shutdown.send(true);
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop_background();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
