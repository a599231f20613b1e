use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// SQLite primary result codes that mean another process holds the file.
/// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14).
const LOCK_RESULT_CODES: [i32; 3] = [5, 6, 14];

/// Errors surfaced by the persistence layer.
///
/// `UniqueViolation` is an expected outcome for the ingestion path: it is how
/// the store reports that a post with the same link already exists. Callers
/// match on the variant rather than on message text.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another gator process has the database locked
    #[error("Another gator process appears to be using the database. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A UNIQUE constraint rejected the write
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

impl StoreError {
    /// Classify a driver error by its structured kind and result code.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.kind() == ErrorKind::UniqueViolation {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }

            // Extended result codes carry the primary code in the low byte
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if primary.is_some_and(|code| LOCK_RESULT_CODES.contains(&code)) {
                return StoreError::InstanceLocked;
            }
        }

        StoreError::Other(err)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

// ============================================================================
// Helper Types
// ============================================================================

/// Fields for a post the ingestion pipeline wants to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner: String,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: self.name,
            url: self.url,
            owner: self.owner,
            last_fetched_at: self.last_fetched_at.map(from_millis),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

/// Internal row type for post queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PostRow {
    pub(crate) fn into_post(self) -> Post {
        Post {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            url: self.url,
            description: self.description,
            published_at: from_millis(self.published_at),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
///
/// `last_fetched_at == None` means the feed has never been polled, which
/// places it ahead of every polled feed in the claim order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Name of the user that registered the feed
    pub owner: String,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted feed entry. `url` is unique across all posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
