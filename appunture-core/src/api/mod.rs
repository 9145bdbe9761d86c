//! The remote Appunture API as seen by the sync engine.

mod error;
mod http;
pub mod routes;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{PendingImage, PendingOperation};

pub use error::ApiError;
pub use http::HttpApiClient;

/// Upload progress callback, in percent.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Remote calls the engine relies on.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Replays one JSON mutation.
    async fn dispatch(&self, op: &PendingOperation) -> Result<(), ApiError>;

    /// Uploads an image binary and returns its remote URL.
    async fn upload_image(&self, image: &PendingImage, progress: ProgressFn)
        -> Result<String, ApiError>;

    /// Links an uploaded image URL to the entity it belongs to.
    async fn attach_image(&self, image: &PendingImage, url: &str) -> Result<(), ApiError>;

    /// Succeeds when the server is reachable and healthy.
    async fn health_check(&self) -> Result<(), ApiError>;

    /// Ids of the points the signed-in user has marked as favorite.
    async fn fetch_favorites(&self) -> Result<Vec<String>, ApiError>;
}
