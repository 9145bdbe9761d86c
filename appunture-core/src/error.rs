use thiserror::Error;

use crate::api::ApiError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors surfaced by [`SyncSession`](crate::SyncSession) actions.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device is offline")]
    Offline,

    #[error("Sync session has been shut down")]
    ShutDown,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
