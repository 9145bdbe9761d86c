use chrono::Utc;
use sqlx::SqlitePool;

/// Locally known favorite points. Updated optimistically before the server
/// confirms, rolled back when it refuses, and rewritten from the server's
/// list after a sync.
#[derive(Clone)]
pub struct FavoriteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct Favorite {
    pub point_id: String,
    pub created_at: String,
}

impl FavoriteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns true if the point was not a favorite yet.
    pub async fn add(&self, point_id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO favorites (point_id, created_at) VALUES (?, ?)")
                .bind(point_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns true if the point was a favorite.
    pub async fn remove(&self, point_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM favorites WHERE point_id = ?")
            .bind(point_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn contains(&self, point_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT point_id FROM favorites WHERE point_id = ?")
                .bind(point_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Makes `point_ids` the whole favorite set in one transaction. Rows
    /// that survive keep their original timestamp. Returns (added, removed).
    pub async fn replace_all<I, S>(&self, point_ids: I) -> Result<(usize, usize), sqlx::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: Vec<String> = point_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let existing: Vec<(String,)> = sqlx::query_as("SELECT point_id FROM favorites")
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for (point_id,) in &existing {
            if !keep.contains(point_id) {
                sqlx::query("DELETE FROM favorites WHERE point_id = ?")
                    .bind(point_id)
                    .execute(&mut *tx)
                    .await?;
                removed += 1;
            }
        }

        let mut added = 0;
        for point_id in &keep {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO favorites (point_id, created_at) VALUES (?, ?)",
            )
            .bind(point_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok((added, removed))
    }

    pub async fn list(&self) -> Result<Vec<Favorite>, sqlx::Error> {
        sqlx::query_as("SELECT point_id, created_at FROM favorites ORDER BY created_at, point_id")
            .fetch_all(&self.pool)
            .await
    }
}
