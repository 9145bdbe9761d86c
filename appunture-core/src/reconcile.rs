//! Hooks that keep optimistic local state in line with the server.

use async_trait::async_trait;

use crate::api::ApiError;
use crate::models::{PendingImage, PendingOperation};

/// Receives the final outcome of delivered or rejected records.
///
/// Operation hooks only fire for the newest queued record of a target. When
/// a later change to the same target is still waiting, the earlier outcome is
/// skipped and the later one decides. Errors returned here are logged by the
/// engine and never stop a pass.
#[async_trait]
pub trait LocalReconciler: Send + Sync {
    /// The server accepted `op`.
    async fn operation_confirmed(&self, _op: &PendingOperation) -> Result<(), String> {
        Ok(())
    }

    /// The server refused `op` for good. Roll back its optimistic change here.
    async fn operation_rejected(
        &self,
        _op: &PendingOperation,
        _error: &ApiError,
    ) -> Result<(), String> {
        Ok(())
    }

    /// The server linked `url` to the image's entity.
    async fn image_confirmed(&self, _image: &PendingImage, _url: &str) -> Result<(), String> {
        Ok(())
    }
}

/// A reconciler that keeps nothing locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReconciler;

impl LocalReconciler for NoopReconciler {}
