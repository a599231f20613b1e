use chrono::Utc;

use super::schema::Database;
use super::types::{to_millis, NewPost, Post, PostRow, StoreError};

/// Maximum number of posts to return from any single query
const MAX_POSTS: i64 = 2000;

const POST_COLUMNS: &str =
    "id, feed_id, title, url, description, published_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post.
    ///
    /// Posts are keyed by link: if a post with `post.url` already exists the
    /// insert is rejected with `StoreError::UniqueViolation` and nothing is
    /// written.
    pub async fn create_post(&self, post: &NewPost) -> Result<Post, StoreError> {
        let now = to_millis(Utc::now());
        let row: PostRow = sqlx::query_as(&format!(
            "INSERT INTO posts (feed_id, title, url, description, published_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {POST_COLUMNS}"
        ))
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(to_millis(post.published_at))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_post())
    }

    /// Posts of one feed, newest first
    pub async fn posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, StoreError> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE feed_id = ?
             ORDER BY published_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Newest posts across every feed registered by `owner`
    pub async fn posts_for_owner(&self, owner: &str, limit: i64) -> Result<Vec<Post>, StoreError> {
        let limit = limit.clamp(0, MAX_POSTS);
        let rows: Vec<PostRow> = sqlx::query_as(
            r#"
                SELECT p.id, p.feed_id, p.title, p.url, p.description,
                       p.published_at, p.created_at, p.updated_at
                FROM posts p
                JOIN feeds f ON f.id = p.feed_id
                WHERE f.owner = ?
                ORDER BY p.published_at DESC, p.id DESC
                LIMIT ?
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Total number of stored posts
    pub async fn count_posts(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
