//! Wiring between the CLI's SQLite database and the core sync session.

mod auto_sync;
mod reconciler;

pub use auto_sync::try_auto_sync;
pub use reconciler::SqliteReconciler;

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use appunture_core::{HttpApiClient, PassOutcome, RemoteApi, SyncError, SyncSession};

use crate::config::{Config, SyncConfig};
use crate::db::{
    init_db, FavoriteRepository, ImageCacheRepository, SqliteMetaStore, SqliteQueueStore,
};

/// How long the session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One command, passes only when asked.
    OneShot,
    /// `sync watch`: passes on start, on reconnect and on every tick.
    Watch,
}

/// What a favorites refresh changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FavoritesRefresh {
    pub total: usize,
    pub added: usize,
    pub removed: usize,
}

/// Everything a command needs: local repositories plus the sync session.
pub struct Workspace {
    pub session: SyncSession,
    pub favorites: FavoriteRepository,
    pub images: ImageCacheRepository,
}

impl Workspace {
    pub async fn open(
        config: &Config,
        mode: SessionMode,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = init_db(&config.database_path.value).await?;
        let api = HttpApiClient::new(
            config.api.base_url.value.clone(),
            config.token().map(str::to_string),
            config.sync.request_timeout(),
        )?;

        let workspace = Self::build(pool, Arc::new(api), &config.sync, mode).await?;
        tracing::debug!("Opened {:?} session on {}", mode, config.database_path.value.display());
        Ok(workspace)
    }

    async fn build(
        pool: SqlitePool,
        api: Arc<dyn RemoteApi>,
        sync: &SyncConfig,
        mode: SessionMode,
    ) -> Result<Self, SyncError> {
        let favorites = FavoriteRepository::new(pool.clone());
        let images = ImageCacheRepository::new(pool.clone());

        let builder = SyncSession::builder(
            api,
            Arc::new(SqliteQueueStore::operations(pool.clone())),
            Arc::new(SqliteQueueStore::images(pool.clone())),
            Arc::new(SqliteMetaStore::new(pool)),
        )
        .reconciler(Arc::new(SqliteReconciler::new(
            favorites.clone(),
            images.clone(),
        )))
        .settings(sync.engine_settings());

        let builder = match mode {
            SessionMode::OneShot => builder.background(false).sync_on_start(false),
            SessionMode::Watch => builder
                .background(true)
                .sync_on_start(true)
                .tick_interval(sync.tick_interval()),
        };

        Ok(Self {
            session: builder.start().await?,
            favorites,
            images,
        })
    }

    /// Drains the queue, then pulls the server's favorites.
    ///
    /// The refresh only runs after a pass that went all the way through. A
    /// failed refresh is logged and leaves the local favorites as they were.
    pub async fn sync_all(&self) -> Result<(PassOutcome, Option<FavoritesRefresh>), SyncError> {
        let outcome = self.session.sync_all().await?;
        let refresh = match &outcome {
            PassOutcome::Completed(report) if !report.interrupted => {
                match self.refresh_favorites().await {
                    Ok(refresh) => Some(refresh),
                    Err(e) => {
                        tracing::warn!("Favorites refresh failed: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };
        Ok((outcome, refresh))
    }

    /// Rewrites the local favorites from the server's list. Points with a
    /// toggle still queued keep their local state.
    pub async fn refresh_favorites(&self) -> Result<FavoritesRefresh, Box<dyn std::error::Error>> {
        let snapshot = self.session.fetch_favorites().await?;
        let local: HashSet<String> = self
            .favorites
            .list()
            .await?
            .into_iter()
            .map(|favorite| favorite.point_id)
            .collect();

        let merged = snapshot.merge(&local);
        let (added, removed) = self.favorites.replace_all(&merged).await?;
        if added + removed > 0 {
            tracing::info!(
                "Favorites refreshed from server: {} added, {} removed",
                added,
                removed
            );
        }

        Ok(FavoritesRefresh {
            total: merged.len(),
            added,
            removed,
        })
    }

    /// Flushes the queues and stops the session.
    pub async fn close(self) -> Result<(), SyncError> {
        self.session.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appunture_core::{
        ApiError, EntityType, NewOperation, OperationKind, PendingImage, PendingOperation,
        ProgressFn,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Answers like the favorites endpoints: refusals are scripted per point,
    /// accepted toggles change the server's list.
    #[derive(Default)]
    struct FavoritesApi {
        refusals: Mutex<HashMap<String, usize>>,
        server: Mutex<Vec<String>>,
    }

    impl FavoritesApi {
        fn refuse(&self, point_id: &str, times: usize) {
            self.refusals
                .lock()
                .unwrap()
                .insert(point_id.to_string(), times);
        }
    }

    #[async_trait]
    impl RemoteApi for FavoritesApi {
        async fn dispatch(&self, op: &PendingOperation) -> Result<(), ApiError> {
            if let Some(left) = self.refusals.lock().unwrap().get_mut(&op.target_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ApiError::from_status(404, "Point not found"));
                }
            }

            if op.entity_type == EntityType::Favorite {
                let mut server = self.server.lock().unwrap();
                server.retain(|id| id != &op.target_id);
                if op.kind == OperationKind::Create {
                    server.push(op.target_id.clone());
                }
            }
            Ok(())
        }

        async fn upload_image(&self, _: &PendingImage, _: ProgressFn) -> Result<String, ApiError> {
            Ok("https://cdn.example.com/img.png".to_string())
        }

        async fn attach_image(&self, _: &PendingImage, _: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ApiError> {
            Ok(())
        }

        async fn fetch_favorites(&self) -> Result<Vec<String>, ApiError> {
            Ok(self.server.lock().unwrap().clone())
        }
    }

    async fn workspace(api: Arc<FavoritesApi>) -> (Workspace, TempDir) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        let workspace = Workspace::build(pool, api, &SyncConfig::default(), SessionMode::OneShot)
            .await
            .unwrap();
        (workspace, temp_dir)
    }

    async fn toggle(workspace: &Workspace, point_id: &str, on: bool) {
        if on {
            workspace.favorites.add(point_id).await.unwrap();
            workspace
                .session
                .enqueue(NewOperation::add_favorite(point_id))
                .await;
        } else {
            workspace.favorites.remove(point_id).await.unwrap();
            workspace
                .session
                .enqueue(NewOperation::remove_favorite(point_id))
                .await;
        }
    }

    #[tokio::test]
    async fn test_refused_add_then_remove_stays_removed() {
        let api = Arc::new(FavoritesApi::default());
        api.refuse("42", 2);
        let (workspace, _temp_dir) = workspace(api.clone()).await;

        toggle(&workspace, "42", true).await;
        toggle(&workspace, "42", false).await;

        let outcome = workspace.session.sync_all().await.unwrap();
        assert_eq!(outcome.report().unwrap().failed.len(), 2);
        assert!(!workspace.favorites.contains("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_first_add_keeps_later_confirmed_add() {
        let api = Arc::new(FavoritesApi::default());
        api.refuse("42", 1);
        let (workspace, _temp_dir) = workspace(api.clone()).await;

        toggle(&workspace, "42", true).await;
        toggle(&workspace, "42", false).await;
        toggle(&workspace, "42", true).await;

        let outcome = workspace.session.sync_all().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded, 2);

        assert!(workspace.favorites.contains("42").await.unwrap());
        assert_eq!(*api.server.lock().unwrap(), vec!["42"]);
    }

    #[tokio::test]
    async fn test_sync_rewrites_favorites_from_server() {
        let api = Arc::new(FavoritesApi::default());
        *api.server.lock().unwrap() = vec!["ST36".to_string()];
        let (workspace, _temp_dir) = workspace(api.clone()).await;

        // Added on another device is missing locally; LI4 was removed there.
        workspace.favorites.add("LI4").await.unwrap();
        toggle(&workspace, "GB20", true).await;

        let (outcome, refresh) = workspace.sync_all().await.unwrap();
        assert_eq!(outcome.report().unwrap().succeeded, 1);
        assert_eq!(
            refresh,
            Some(FavoritesRefresh {
                total: 2,
                added: 1,
                removed: 1
            })
        );

        let mut points: Vec<String> = workspace
            .favorites
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.point_id)
            .collect();
        points.sort();
        assert_eq!(points, vec!["GB20", "ST36"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_queued_toggles() {
        let api = Arc::new(FavoritesApi::default());
        *api.server.lock().unwrap() = vec!["LI4".to_string(), "ST36".to_string()];
        let (workspace, _temp_dir) = workspace(api).await;

        workspace.favorites.add("LI4").await.unwrap();
        workspace.favorites.add("ST36").await.unwrap();
        toggle(&workspace, "ST36", false).await;
        toggle(&workspace, "GB20", true).await;

        workspace.refresh_favorites().await.unwrap();

        assert!(workspace.favorites.contains("LI4").await.unwrap());
        assert!(workspace.favorites.contains("GB20").await.unwrap());
        assert!(!workspace.favorites.contains("ST36").await.unwrap());
    }
}
