//! Appunture Core Library
//!
//! Offline operation queue and sync engine for Appunture clients. Mutations
//! made while offline are stored durably, replayed against the REST API once
//! the device is back online, and summarized as a [`SyncStatus`] for the UI.

pub mod api;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod favorites;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod store;

pub use api::{ApiError, HttpApiClient, ProgressFn, RemoteApi};
pub use connectivity::{ConnectivityMonitor, NetworkProbe, StaticProbe, Subscription};
pub use engine::{
    EngineParts, EngineSettings, PassOutcome, RetryPolicy, SkipReason, SyncEngine, SyncReport,
};
pub use error::SyncError;
pub use favorites::FavoritesSnapshot;
pub use models::{
    EntityType, ImageTarget, NewImageUpload, NewOperation, OperationId, OperationKind,
    OperationStatus, PendingImage, PendingOperation, TargetKey, UploadProgress,
};
pub use queue::{
    ImageQueue, OperationLog, Queue, QueueCounts, QueueError, QueueFilter, QueueRecord,
};
pub use reconcile::{LocalReconciler, NoopReconciler};
pub use session::{SyncSession, SyncSessionBuilder};
pub use status::{StatusProjector, StatusStore, SyncStatus, COMPLETION_MESSAGE};
pub use store::{
    FileMetaStore, FileQueueStore, MemoryMetaStore, MemoryQueueStore, MetaStore, QueueStore,
    StoreError,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
