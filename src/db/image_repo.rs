use appunture_core::EntityType;
use chrono::Utc;
use sqlx::SqlitePool;

/// Last confirmed image URL per entity, so screens can render without a fetch.
#[derive(Clone)]
pub struct ImageCacheRepository {
    pool: SqlitePool,
}

impl ImageCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set(
        &self,
        entity_type: EntityType,
        target_id: &str,
        url: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO cached_images (entity_type, target_id, url, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_type, target_id) DO UPDATE SET url = excluded.url, updated_at = excluded.updated_at
            "#,
        )
        .bind(entity_type.as_str())
        .bind(target_id)
        .bind(url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        entity_type: EntityType,
        target_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT url FROM cached_images WHERE entity_type = ? AND target_id = ?",
        )
        .bind(entity_type.as_str())
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}
