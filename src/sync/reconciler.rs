use appunture_core::{
    ApiError, EntityType, LocalReconciler, OperationKind, PendingImage, PendingOperation,
};
use async_trait::async_trait;

use crate::db::{FavoriteRepository, ImageCacheRepository};

/// Keeps the local SQLite tables in line with what the server accepted.
///
/// Favorites are toggled optimistically by the commands. The session only
/// reports the newest change of each point, so the outcome seen here is the
/// one the local row should end up matching. Confirmed image URLs land in the
/// image cache.
pub struct SqliteReconciler {
    favorites: FavoriteRepository,
    images: ImageCacheRepository,
}

impl SqliteReconciler {
    pub fn new(favorites: FavoriteRepository, images: ImageCacheRepository) -> Self {
        Self { favorites, images }
    }
}

#[async_trait]
impl LocalReconciler for SqliteReconciler {
    async fn operation_confirmed(&self, op: &PendingOperation) -> Result<(), String> {
        if op.entity_type != EntityType::Favorite {
            return Ok(());
        }

        let point_id = op.target_id.as_str();
        let result = match op.kind {
            OperationKind::Create => self.favorites.add(point_id).await,
            OperationKind::Delete => self.favorites.remove(point_id).await,
            OperationKind::Update => return Ok(()),
        };
        if result.map_err(|e| e.to_string())? {
            tracing::debug!("Favorite {} for point {} applied locally", op.kind, point_id);
        }
        Ok(())
    }

    async fn operation_rejected(
        &self,
        op: &PendingOperation,
        error: &ApiError,
    ) -> Result<(), String> {
        if op.entity_type != EntityType::Favorite {
            return Ok(());
        }

        let point_id = op.target_id.as_str();
        let result = match op.kind {
            OperationKind::Create => self.favorites.remove(point_id).await,
            // 404: the server has no such favorite, so the removal stands.
            OperationKind::Delete if error.status() == Some(404) => return Ok(()),
            OperationKind::Delete => self.favorites.add(point_id).await,
            OperationKind::Update => return Ok(()),
        };
        result.map_err(|e| e.to_string())?;

        tracing::info!(
            "Rolled back favorite {} for point {}: {}",
            op.kind,
            point_id,
            error
        );
        Ok(())
    }

    async fn image_confirmed(&self, image: &PendingImage, url: &str) -> Result<(), String> {
        self.images
            .set(image.entity_type, &image.target_id, url)
            .await
            .map_err(|e| e.to_string())
    }
}
