use super::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

use crate::models::{
    EntityType, ImageTarget, NewImageUpload, NewOperation, OperationKind, OperationStatus,
};
use crate::status::{StatusStore, COMPLETION_MESSAGE};
use crate::store::{MemoryMetaStore, MemoryQueueStore};

/// Scripted remote API. Every call succeeds unless a result was queued for its target.
#[derive(Default)]
struct FakeApi {
    calls: Mutex<Vec<String>>,
    script: Mutex<HashMap<String, VecDeque<ApiError>>>,
    uploads: Mutex<usize>,
    attach_script: Mutex<VecDeque<ApiError>>,
    latency: Duration,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<usize>,
    offline_after: Option<(usize, ConnectivityMonitor)>,
    gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
}

impl FakeApi {
    fn fail(&self, target: &str, error: ApiError, times: usize) {
        let mut script = self.script.lock().unwrap();
        let queue = script.entry(target.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn dispatch(&self, op: &PendingOperation) -> Result<(), ApiError> {
        let target = op.target().to_string();
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(format!("{} {}", op.kind, target));
            calls.len()
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(target.clone()).or_default();
            *count += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            *max = (*max).max(*count);
        }

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.acquire().await.unwrap().forget();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        *self.in_flight.lock().unwrap().get_mut(&target).unwrap() -= 1;

        if let Some((after, monitor)) = &self.offline_after {
            if call_number == *after {
                monitor.set_online(false);
            }
        }

        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&target)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn upload_image(
        &self,
        image: &PendingImage,
        progress: ProgressFn,
    ) -> Result<String, ApiError> {
        progress(50);
        progress(100);
        *self.uploads.lock().unwrap() += 1;
        Ok(format!("https://cdn.example.com/{}", image.file_name()))
    }

    async fn attach_image(&self, image: &PendingImage, url: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach {} {}", image.target(), url));
        match self.attach_script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn fetch_favorites(&self) -> Result<Vec<String>, ApiError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingReconciler {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl LocalReconciler for RecordingReconciler {
    async fn operation_confirmed(&self, op: &PendingOperation) -> Result<(), String> {
        self.events.lock().unwrap().push(format!("confirmed {}", op.target()));
        Ok(())
    }

    async fn operation_rejected(
        &self,
        op: &PendingOperation,
        error: &ApiError,
    ) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push(format!("rejected {} {}", op.target(), error));
        Err("rollback store unavailable".to_string())
    }

    async fn image_confirmed(&self, image: &PendingImage, url: &str) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push(format!("image {} {}", image.target(), url));
        Ok(())
    }
}

struct Harness {
    engine: Arc<SyncEngine>,
    operations: Arc<OperationLog>,
    images: Arc<ImageQueue>,
    api: Arc<FakeApi>,
    monitor: ConnectivityMonitor,
    status: Arc<StatusStore>,
    meta: MemoryMetaStore,
    reconciler: Arc<RecordingReconciler>,
}

fn fast_settings(max_attempts: u32) -> EngineSettings {
    let fast = |policy: RetryPolicy| {
        policy
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
    };
    EngineSettings {
        operation_policy: fast(RetryPolicy::operations()),
        image_policy: fast(RetryPolicy::images()),
        ..EngineSettings::default()
    }
}

async fn harness_with(
    monitor: ConnectivityMonitor,
    api: FakeApi,
    settings: EngineSettings,
) -> Harness {
    let operations: Arc<OperationLog> = Arc::new(
        Queue::open("operations", Arc::new(MemoryQueueStore::new()))
            .await
            .unwrap(),
    );
    let images: Arc<ImageQueue> = Arc::new(
        Queue::open("images", Arc::new(MemoryQueueStore::new()))
            .await
            .unwrap(),
    );
    let api = Arc::new(api);
    let status = Arc::new(StatusStore::default());
    let meta = MemoryMetaStore::new();
    let reconciler = Arc::new(RecordingReconciler::default());

    let engine = Arc::new(SyncEngine::new(
        EngineParts {
            operations: operations.clone(),
            images: images.clone(),
            api: api.clone(),
            connectivity: monitor.clone(),
            meta: Arc::new(meta.clone()),
            status: status.clone(),
            reconciler: reconciler.clone(),
        },
        settings,
    ));

    Harness {
        engine,
        operations,
        images,
        api,
        monitor,
        status,
        meta,
        reconciler,
    }
}

async fn harness(api: FakeApi, settings: EngineSettings) -> Harness {
    harness_with(ConnectivityMonitor::with_status(true), api, settings).await
}

fn point_update(id: &str, name: &str) -> NewOperation {
    NewOperation::new(
        EntityType::Point,
        OperationKind::Update,
        id,
        serde_json::json!({ "name": name }),
    )
}

fn report(outcome: PassOutcome) -> SyncReport {
    match outcome {
        PassOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_favorite_toggle_syncs_in_order() {
    let h = harness_with(
        ConnectivityMonitor::new(),
        FakeApi::default(),
        fast_settings(5),
    )
    .await;

    h.operations.append(NewOperation::add_favorite("42")).await;
    h.operations.append(NewOperation::remove_favorite("42")).await;
    assert_eq!(h.operations.counts().await.pending, 2);

    assert_eq!(
        h.engine.process_sync_queue().await,
        PassOutcome::Skipped {
            reason: SkipReason::Offline
        }
    );
    assert!(h.api.calls().is_empty());

    h.monitor.set_online(true);
    let report = report(h.engine.process_sync_queue().await);

    assert_eq!(h.api.calls(), vec!["create favorite:42", "delete favorite:42"]);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 2);
    assert!(h.operations.is_empty().await);

    let status = h.status.current();
    assert_eq!(status.pending_operations, 0);
    assert!(!status.sync_in_progress);
    assert!(status.last_sync.is_some());
    assert_eq!(status.notification_message.as_deref(), Some(COMPLETION_MESSAGE));
    assert_eq!(h.meta.load_last_sync().await.unwrap(), status.last_sync);
}

#[tokio::test]
async fn test_same_target_replays_in_append_order() {
    let api = FakeApi {
        latency: Duration::from_millis(2),
        ..FakeApi::default()
    };
    let h = harness(api, fast_settings(5)).await;

    for i in 0..4 {
        h.operations.append(point_update("LI4", &format!("v{}", i))).await;
        h.operations.append(point_update("ST36", &format!("v{}", i))).await;
        h.operations.append(NewOperation::add_favorite(i.to_string())).await;
    }

    report(h.engine.process_sync_queue().await);

    let calls = h.api.calls();
    assert_eq!(calls.len(), 12);
    assert_eq!(*h.api.max_in_flight.lock().unwrap(), 1);

    let li4: Vec<_> = calls.iter().filter(|c| c.ends_with("point:LI4")).collect();
    assert_eq!(li4.len(), 4);
    assert!(h.operations.is_empty().await);
}

#[tokio::test]
async fn test_same_target_payloads_arrive_in_order() {
    struct OrderApi {
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteApi for OrderApi {
        async fn dispatch(&self, op: &PendingOperation) -> Result<(), ApiError> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let name = op.payload["name"].as_str().unwrap_or_default().to_string();
            self.names.lock().unwrap().push(format!("{}={}", op.target_id, name));
            Ok(())
        }
        async fn upload_image(&self, _: &PendingImage, _: ProgressFn) -> Result<String, ApiError> {
            unreachable!()
        }
        async fn attach_image(&self, _: &PendingImage, _: &str) -> Result<(), ApiError> {
            unreachable!()
        }
        async fn health_check(&self) -> Result<(), ApiError> {
            Ok(())
        }
        async fn fetch_favorites(&self) -> Result<Vec<String>, ApiError> {
            unreachable!()
        }
    }

    let operations: Arc<OperationLog> = Arc::new(
        Queue::open("operations", Arc::new(MemoryQueueStore::new()))
            .await
            .unwrap(),
    );
    let images: Arc<ImageQueue> = Arc::new(
        Queue::open("images", Arc::new(MemoryQueueStore::new()))
            .await
            .unwrap(),
    );
    let api = Arc::new(OrderApi {
        names: Mutex::new(Vec::new()),
    });
    let engine = SyncEngine::new(
        EngineParts {
            operations: operations.clone(),
            images,
            api: api.clone(),
            connectivity: ConnectivityMonitor::with_status(true),
            meta: Arc::new(MemoryMetaStore::new()),
            status: Arc::new(StatusStore::default()),
            reconciler: Arc::new(crate::reconcile::NoopReconciler),
        },
        fast_settings(5),
    );

    for i in 0..5 {
        operations.append(point_update("A", &i.to_string())).await;
        operations.append(point_update("B", &i.to_string())).await;
    }
    report(engine.process_sync_queue().await);

    let names = api.names.lock().unwrap();
    for target in ["A", "B"] {
        let seen: Vec<String> = names
            .iter()
            .filter(|n| n.starts_with(target))
            .cloned()
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("{}={}", target, i)).collect();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn test_concurrent_pass_is_a_noop() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));
    let api = FakeApi {
        gate: Some((entered.clone(), release.clone())),
        ..FakeApi::default()
    };
    let h = harness(api, fast_settings(5)).await;
    h.operations.append(NewOperation::add_favorite("42")).await;

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.process_sync_queue().await });
    entered.notified().await;

    assert!(h.engine.is_running());
    assert!(h.status.current().sync_in_progress);
    assert_eq!(
        h.engine.process_sync_queue().await,
        PassOutcome::Skipped {
            reason: SkipReason::AlreadyRunning
        }
    );
    assert_eq!(h.api.calls().len(), 1);

    release.add_permits(10);
    let report = report(first.await.unwrap());
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.api.calls().len(), 1);
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_server_errors_exhaust_ceiling_then_park() {
    let api = FakeApi::default();
    api.fail(
        "point:LI4",
        ApiError::from_status(500, "Internal Server Error"),
        3,
    );
    let h = harness(api, fast_settings(3)).await;
    let op = h.operations.append(point_update("LI4", "Hegu")).await;
    h.operations.append(NewOperation::add_favorite("42")).await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.failed, vec![op.id]);
    assert_eq!(report.retries, 2);
    assert_eq!(report.succeeded, 1);

    let parked = h.operations.get(op.id).await.unwrap();
    assert_eq!(parked.status(), OperationStatus::Failed);
    assert_eq!(parked.attempt_count(), 3);
    assert_eq!(parked.last_error(), Some("HTTP 500: Internal Server Error"));

    let status = h.status.current();
    assert_eq!(status.failed_operations.len(), 1);
    assert_eq!(status.pending_operations, 0);
    assert!(status.notification_message.is_none());

    // Exhaustion is not a rejection: no rollback.
    let events = h.reconciler.events.lock().unwrap().clone();
    assert_eq!(events, vec!["confirmed favorite:42"]);

    let calls_before = h.api.calls().len();
    report_is_empty(h.engine.process_sync_queue().await);
    assert_eq!(h.api.calls().len(), calls_before);

    h.operations.reset(op.id).await.unwrap();
    let retried = self::report(h.engine.process_sync_queue().await);
    assert_eq!(retried.succeeded, 1);
    assert!(h.operations.is_empty().await);
}

fn report_is_empty(outcome: PassOutcome) {
    let report = report(outcome);
    assert_eq!(report.dispatched, 0);
}

#[tokio::test]
async fn test_rejection_fails_fast_and_queue_continues() {
    let api = FakeApi::default();
    api.fail("point:LI4", ApiError::from_status(422, "name is required"), 1);
    let h = harness(api, fast_settings(5)).await;

    let bad = h.operations.append(point_update("LI4", "")).await;
    h.operations.append(point_update("LI4", "Hegu")).await;
    h.operations.append(NewOperation::add_favorite("42")).await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.failed, vec![bad.id]);
    assert_eq!(report.retries, 0);
    assert_eq!(report.succeeded, 2);

    let failed = h.operations.get(bad.id).await.unwrap();
    assert_eq!(failed.attempt_count(), 1);
    assert_eq!(failed.last_error(), Some("HTTP 422: name is required"));

    // The later LI4 update supersedes the refused one, so only it is reconciled.
    let events = h.reconciler.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(events.contains(&"confirmed point:LI4".to_string()));
    assert!(events.contains(&"confirmed favorite:42".to_string()));
}

#[tokio::test]
async fn test_only_newest_change_of_a_target_is_reconciled() {
    let api = FakeApi::default();
    api.fail("favorite:42", ApiError::from_status(404, "Point not found"), 2);
    api.fail("point:ST36", ApiError::from_status(422, "name is required"), 1);
    let h = harness(api, fast_settings(5)).await;

    h.operations.append(NewOperation::add_favorite("42")).await;
    h.operations.append(NewOperation::remove_favorite("42")).await;
    h.operations.append(point_update("ST36", "")).await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.failed.len(), 3);

    let mut events = h.reconciler.events.lock().unwrap().clone();
    events.sort();
    assert_eq!(
        events,
        vec![
            "rejected favorite:42 HTTP 404: Point not found",
            "rejected point:ST36 HTTP 422: name is required",
        ]
    );
}

#[tokio::test]
async fn test_earlier_rejection_does_not_undo_later_confirmed_change() {
    let api = FakeApi::default();
    api.fail("favorite:7", ApiError::from_status(409, "conflict"), 1);
    let h = harness(api, fast_settings(5)).await;

    h.operations.append(NewOperation::add_favorite("7")).await;
    h.operations.append(NewOperation::remove_favorite("7")).await;
    h.operations.append(NewOperation::add_favorite("7")).await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.succeeded, 2);

    let events = h.reconciler.events.lock().unwrap().clone();
    assert_eq!(events, vec!["confirmed favorite:7"]);
}

#[tokio::test]
async fn test_connectivity_drop_mid_pass() {
    let monitor = ConnectivityMonitor::with_status(true);
    let api = FakeApi {
        offline_after: Some((2, monitor.clone())),
        ..FakeApi::default()
    };
    let settings = fast_settings(5).with_concurrency(1);
    let h = harness_with(monitor, api, settings).await;

    for id in 1..=5 {
        h.operations
            .append(NewOperation::add_favorite(id.to_string()))
            .await;
    }

    let report = report(h.engine.process_sync_queue().await);
    assert!(report.interrupted);
    assert_eq!(report.succeeded, 2);
    assert!(!h.status.current().sync_in_progress);
    assert!(h.status.current().last_sync.is_none());

    let remaining = h.operations.list(&QueueFilter::all()).await;
    assert_eq!(remaining.len(), 3);
    assert!(remaining
        .iter()
        .all(|op| op.status() == OperationStatus::Pending && op.attempt_count() == 0));

    h.monitor.set_online(true);
    let resumed = self::report(h.engine.process_sync_queue().await);
    assert_eq!(resumed.dispatched, 3);
    assert_eq!(
        &h.api.calls()[2..],
        &["create favorite:3", "create favorite:4", "create favorite:5"]
    );
    assert!(h.operations.is_empty().await);
}

#[tokio::test]
async fn test_offline_during_backoff_stops_lane() {
    let monitor = ConnectivityMonitor::with_status(true);
    let api = FakeApi {
        offline_after: Some((1, monitor.clone())),
        ..FakeApi::default()
    };
    api.fail("point:LI4", ApiError::Timeout, 1);

    let mut settings = fast_settings(5);
    settings.operation_policy = settings
        .operation_policy
        .with_delays(Duration::from_secs(30), Duration::from_secs(30));
    let h = harness_with(monitor, api, settings).await;
    let op = h.operations.append(point_update("LI4", "Hegu")).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.engine.process_sync_queue())
        .await
        .expect("pass should not wait out the backoff");
    assert!(report(outcome).interrupted);

    let pending = h.operations.get(op.id).await.unwrap();
    assert_eq!(pending.status(), OperationStatus::Pending);
    assert_eq!(pending.attempt_count(), 1);
    assert_eq!(pending.last_error(), Some("Request timed out"));
}

#[tokio::test]
async fn test_slow_call_times_out_as_retryable() {
    let api = FakeApi {
        latency: Duration::from_millis(200),
        ..FakeApi::default()
    };
    let mut settings = fast_settings(2);
    settings.attempt_timeout = Duration::from_millis(10);
    let h = harness(api, settings).await;
    let op = h.operations.append(NewOperation::add_favorite("42")).await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.retries, 1);
    assert_eq!(report.failed, vec![op.id]);
    assert_eq!(
        h.operations.get(op.id).await.unwrap().last_error(),
        Some("Request timed out")
    );
}

#[tokio::test]
async fn test_image_retry_does_not_reupload() {
    let api = FakeApi::default();
    api.attach_script
        .lock()
        .unwrap()
        .push_back(ApiError::from_status(503, "busy"));
    let h = harness(api, fast_settings(5)).await;

    h.operations
        .append(NewOperation::update_profile(serde_json::json!({ "name": "Ana" })))
        .await;
    let image = h
        .images
        .append(NewImageUpload::new(ImageTarget::Profile, "/photos/me.jpg"))
        .await;
    assert_eq!(h.images.counts().await.pending, 1);

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.images_uploaded, 1);
    assert_eq!(report.retries, 1);
    assert_eq!(*h.api.uploads.lock().unwrap(), 1);

    let calls = h.api.calls();
    assert_eq!(calls[0], "update profile:me");
    assert_eq!(calls.len(), 3);
    assert!(calls[1].starts_with("attach profile_image:me"));

    assert!(h.images.get(image.id).await.is_none());
    let status = h.status.current();
    assert_eq!(status.pending_images, 0);
    assert!(status.uploads.is_empty());
    assert_eq!(status.notification_message.as_deref(), Some(COMPLETION_MESSAGE));

    let events = h.reconciler.events.lock().unwrap().clone();
    assert!(events.contains(&"image profile_image:me https://cdn.example.com/me.jpg".to_string()));
}

#[tokio::test]
async fn test_failed_image_is_counted() {
    let api = FakeApi::default();
    api.attach_script
        .lock()
        .unwrap()
        .push_back(ApiError::from_status(413, "file too large"));
    let h = harness(api, fast_settings(5)).await;
    let image = h
        .images
        .append(NewImageUpload::new(ImageTarget::Point("LI4".into()), "/photos/li4.png"))
        .await;

    let report = report(h.engine.process_sync_queue().await);
    assert_eq!(report.failed, vec![image.id]);

    let status = h.status.current();
    assert_eq!(status.failed_images.len(), 1);
    assert_eq!(status.failed_count(), 1);
    assert_eq!(
        status.failed_images[0].uploaded_url.as_deref(),
        Some("https://cdn.example.com/li4.png")
    );
}

#[tokio::test]
async fn test_operations_appended_during_pass_are_drained() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));
    let api = FakeApi {
        gate: Some((entered.clone(), release.clone())),
        ..FakeApi::default()
    };
    let h = harness(api, fast_settings(5)).await;
    h.operations.append(NewOperation::add_favorite("1")).await;

    let engine = h.engine.clone();
    let pass = tokio::spawn(async move { engine.process_sync_queue().await });
    entered.notified().await;

    h.operations.append(NewOperation::add_favorite("2")).await;
    release.add_permits(10);

    let report = report(pass.await.unwrap());
    assert_eq!(report.succeeded, 2);
    assert!(h.operations.is_empty().await);
}

#[test]
fn test_lanes_group_by_target_in_order() {
    use crate::queue::QueueRecord;
    use chrono::Utc;

    let make = |draft: NewOperation, seq: u64| {
        PendingOperation::from_draft(draft, OperationId::new(), seq, Utc::now())
    };
    let records = vec![
        make(point_update("A", "1"), 1),
        make(point_update("B", "1"), 2),
        make(point_update("A", "2"), 3),
        make(NewOperation::add_favorite("A"), 4),
    ];

    let lanes = into_lanes(records);
    let sequences: Vec<Vec<u64>> = lanes
        .iter()
        .map(|lane| lane.iter().map(|op| op.sequence).collect())
        .collect();
    assert_eq!(sequences, vec![vec![1, 3], vec![2], vec![4]]);
}

#[test]
fn test_concurrency_is_clamped() {
    assert_eq!(EngineSettings::default().with_concurrency(0).concurrency, 1);
    assert_eq!(EngineSettings::default().with_concurrency(99).concurrency, 16);
}
