use chrono::{DateTime, Utc};
use std::future::Future;

use super::schema::Database;
use super::types::{Feed, NewPost, Post, StoreError};

/// The persistence operations the polling pipeline depends on.
///
/// The scheduler and the ingestion committer only ever talk to storage
/// through this trait. [`Database`] is the production implementation.
pub trait FeedStore: Send + Sync {
    /// The feed polled least recently (never-polled first), or `None` when
    /// there are no feeds.
    fn next_feed_to_fetch(&self) -> impl Future<Output = Result<Option<Feed>, StoreError>> + Send;

    /// Record that `feed_id` was polled at `at`.
    fn mark_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a post. An existing link yields `StoreError::UniqueViolation`.
    fn create_post(&self, post: &NewPost) -> impl Future<Output = Result<Post, StoreError>> + Send;
}

impl FeedStore for Database {
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, StoreError> {
        Database::next_feed_to_fetch(self).await
    }

    async fn mark_feed_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        if !Database::mark_feed_fetched(self, feed_id, at).await? {
            tracing::warn!(feed_id = feed_id, "Stamped a feed that no longer exists");
        }
        Ok(())
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post, StoreError> {
        Database::create_post(self, post).await
    }
}

impl<S: FeedStore> FeedStore for std::sync::Arc<S> {
    fn next_feed_to_fetch(&self) -> impl Future<Output = Result<Option<Feed>, StoreError>> + Send {
        (**self).next_feed_to_fetch()
    }

    fn mark_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).mark_feed_fetched(feed_id, at)
    }

    fn create_post(&self, post: &NewPost) -> impl Future<Output = Result<Post, StoreError>> + Send {
        (**self).create_post(post)
    }
}
