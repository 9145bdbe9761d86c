use appunture_core::{
    MetaStore, OperationId, PendingImage, PendingOperation, QueueRecord, QueueStore, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::marker::PhantomData;

const OPERATIONS_TABLE: &str = "sync_queue";
const IMAGES_TABLE: &str = "image_sync_queue";
const LAST_SYNC_KEY: &str = "last_sync";

/// Queue storage on one of the `*sync_queue` tables.
///
/// Each row holds the whole record as JSON; the other columns mirror it for
/// ordering and ad-hoc inspection with the sqlite shell.
pub struct SqliteQueueStore<T> {
    pool: SqlitePool,
    table: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl SqliteQueueStore<PendingOperation> {
    pub fn operations(pool: SqlitePool) -> Self {
        Self::on_table(pool, OPERATIONS_TABLE)
    }
}

impl SqliteQueueStore<PendingImage> {
    pub fn images(pool: SqlitePool) -> Self {
        Self::on_table(pool, IMAGES_TABLE)
    }
}

impl<T> SqliteQueueStore<T> {
    fn on_table(pool: SqlitePool, table: &'static str) -> Self {
        Self {
            pool,
            table,
            _record: PhantomData,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    record: String,
}

#[async_trait]
impl<T> QueueStore<T> for SqliteQueueStore<T>
where
    T: QueueRecord + Serialize + DeserializeOwned,
{
    async fn load_all(&self) -> Result<Vec<T>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT id, record FROM {} ORDER BY created_at, sequence",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str(&row.record) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable {} row {}: {}", self.table, row.id, e);
                }
            }
        }
        Ok(records)
    }

    async fn save(&self, record: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let target = record.target();

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, sequence, entity_type, target_id, status, created_at, record)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status, record = excluded.record
            "#,
            self.table
        ))
        .bind(record.id().to_string())
        .bind(i64::try_from(record.sequence()).unwrap_or(i64::MAX))
        .bind(target.entity_type.as_str())
        .bind(&target.target_id)
        .bind(record.delivery().status.to_string())
        .bind(record.created_at().to_rfc3339())
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, id: OperationId) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

/// Sync metadata in the `sync_meta` key/value table.
pub struct SqliteMetaStore {
    pool: SqlitePool,
}

impl SqliteMetaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_meta WHERE key = ?")
            .bind(LAST_SYNC_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some((value,)) => DateTime::parse_from_rfc3339(&value)
                .map(|at| Some(at.with_timezone(&Utc)))
                .map_err(|e| StoreError::Backend(format!("Invalid last sync time: {}", e))),
            None => Ok(None),
        }
    }

    async fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SYNC_KEY)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
