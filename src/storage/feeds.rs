use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{to_millis, Feed, FeedRow, StoreError};

const FEED_COLUMNS: &str = "id, name, url, owner, last_fetched_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed.
    ///
    /// Returns `StoreError::UniqueViolation` if a feed with this URL exists.
    pub async fn insert_feed(
        &self,
        name: &str,
        url: &str,
        owner: &str,
    ) -> Result<Feed, StoreError> {
        let now = to_millis(Utc::now());
        let row: FeedRow = sqlx::query_as(&format!(
            "INSERT INTO feeds (name, url, owner, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url)
        .bind(owner)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_feed())
    }

    /// All feeds, ordered by name
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY name, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// The feed polled least recently, never-polled feeds first.
    ///
    /// Ties (including several never-polled feeds) resolve by insertion order.
    pub async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// Record that a feed was polled at `at`.
    ///
    /// Returns `Ok(false)` if no feed has this id.
    pub async fn mark_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let at = to_millis(at);
        let result =
            sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
                .bind(at)
                .bind(at)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
