use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::dates::{DateParseError, DateParser};
use crate::feed::parser::RawEntry;
use crate::storage::{FeedStore, NewPost, Post, StoreError};

/// An entry ready to be stored: publish date resolved, link present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntry {
    pub title: String,
    /// Canonical link, the deduplication key
    pub link: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Why a single entry was dropped before reaching storage
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Date(#[from] DateParseError),
    #[error("entry has no link")]
    MissingLink,
}

impl NormalizedEntry {
    pub fn from_raw(raw: &RawEntry, dates: &DateParser) -> Result<Self, EntryError> {
        let link = raw.link.trim();
        if link.is_empty() {
            return Err(EntryError::MissingLink);
        }
        let published_at = dates.parse(&raw.pub_date)?;

        Ok(Self {
            title: raw.title.clone(),
            link: link.to_string(),
            description: Some(raw.description.clone()).filter(|d| !d.is_empty()),
            published_at,
        })
    }
}

/// Result of committing one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new post was created
    Committed(Post),
    /// A post with this link already exists
    Skipped,
}

/// Storage rejected the post for a reason other than a duplicate link
#[derive(Debug, Error)]
#[error("Failed to store post {link}: {source}")]
pub struct CommitError {
    pub link: String,
    #[source]
    pub source: StoreError,
}

/// Persist `entry` as a post of `feed_id`.
///
/// A unique-link violation means the entry was ingested before and is
/// reported as [`CommitOutcome::Skipped`], not as an error.
pub async fn commit<S: FeedStore>(
    store: &S,
    entry: &NormalizedEntry,
    feed_id: i64,
) -> Result<CommitOutcome, CommitError> {
    let post = NewPost {
        feed_id,
        title: entry.title.clone(),
        url: entry.link.clone(),
        description: entry.description.clone(),
        published_at: entry.published_at,
    };

    match store.create_post(&post).await {
        Ok(post) => Ok(CommitOutcome::Committed(post)),
        Err(StoreError::UniqueViolation(_)) => Ok(CommitOutcome::Skipped),
        Err(source) => Err(CommitError {
            link: entry.link.clone(),
            source,
        }),
    }
}

/// Per-document ingestion tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// New posts created
    pub committed: usize,
    /// Entries whose link was already stored
    pub skipped: usize,
    /// Entries dropped for an unreadable date or a missing link
    pub invalid: usize,
    /// Entries storage failed to write
    pub failed: usize,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.committed + self.skipped + self.invalid + self.failed
    }
}

/// Normalize and commit every entry, in order.
///
/// A bad entry (unparseable date, missing link, storage failure) is logged
/// and counted; it never stops the remaining entries.
pub async fn ingest_entries<S: FeedStore>(
    store: &S,
    dates: &DateParser,
    feed_id: i64,
    entries: &[RawEntry],
) -> IngestReport {
    let mut report = IngestReport::default();

    for raw in entries {
        let entry = match NormalizedEntry::from_raw(raw, dates) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed_id,
                    link = %raw.link,
                    pub_date = %raw.pub_date,
                    error = %e,
                    "Skipping entry"
                );
                report.invalid += 1;
                continue;
            }
        };

        match commit(store, &entry, feed_id).await {
            Ok(CommitOutcome::Committed(post)) => {
                tracing::debug!(
                    feed_id = feed_id,
                    post_id = post.id,
                    link = %post.url,
                    "Stored post"
                );
                report.committed += 1;
            }
            Ok(CommitOutcome::Skipped) => {
                tracing::debug!(feed_id = feed_id, link = %entry.link, "Post already stored");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::error!(
                    feed_id = feed_id,
                    link = %e.link,
                    error = %e.source,
                    "Failed to store post"
                );
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, Feed};
    use chrono::TimeZone;

    /// Delegates to a real database but fails writes for one link
    struct FailingStore {
        db: Database,
        poisoned_link: &'static str,
    }

    impl FeedStore for FailingStore {
        async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, StoreError> {
            self.db.next_feed_to_fetch().await
        }

        async fn mark_feed_fetched(
            &self,
            feed_id: i64,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            FeedStore::mark_feed_fetched(&self.db, feed_id, at).await
        }

        async fn create_post(&self, post: &NewPost) -> Result<Post, StoreError> {
            if post.url == self.poisoned_link {
                return Err(StoreError::Other(sqlx::Error::PoolTimedOut));
            }
            self.db.create_post(post).await
        }
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .insert_feed("Test", "https://example.com/rss", "tester")
            .await
            .unwrap();
        (db, feed.id)
    }

    fn raw(n: usize) -> RawEntry {
        RawEntry {
            title: format!("Entry {}", n),
            link: format!("https://example.com/{}", n),
            description: format!("Body {}", n),
            pub_date: "Mon, 02 Jan 2006 15:04:05 -0700".to_string(),
        }
    }

    fn normalized(link: &str) -> NormalizedEntry {
        NormalizedEntry {
            title: "T".to_string(),
            link: link.to_string(),
            description: None,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_from_raw_trims_link_and_drops_empty_description() {
        let mut entry = raw(1);
        entry.link = "  https://example.com/1 \n".to_string();
        entry.description = String::new();

        let normalized = NormalizedEntry::from_raw(&entry, &DateParser::default()).unwrap();
        assert_eq!(normalized.link, "https://example.com/1");
        assert!(normalized.description.is_none());
        assert_eq!(
            normalized.published_at,
            Utc.with_ymd_and_hms(2006, 1, 2, 22, 4, 5).unwrap()
        );
    }

    #[test]
    fn test_from_raw_rejects_missing_link() {
        let mut entry = raw(1);
        entry.link = " ".to_string();
        assert!(matches!(
            NormalizedEntry::from_raw(&entry, &DateParser::default()),
            Err(EntryError::MissingLink)
        ));
    }

    #[test]
    fn test_from_raw_rejects_bad_date() {
        let mut entry = raw(1);
        entry.pub_date = "not-a-date".to_string();
        assert!(matches!(
            NormalizedEntry::from_raw(&entry, &DateParser::default()),
            Err(EntryError::Date(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_then_duplicate_is_skipped() {
        let (db, feed_id) = setup().await;
        let entry = normalized("https://example.com/x");

        let first = commit(&db, &entry, feed_id).await.unwrap();
        assert!(matches!(
            first,
            CommitOutcome::Committed(ref p) if p.url == entry.link
        ));

        let second = commit(&db, &entry, feed_id).await.unwrap();
        assert_eq!(second, CommitOutcome::Skipped);
        assert_eq!(db.count_posts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_storage_failure_is_error() {
        let (db, feed_id) = setup().await;
        let store = FailingStore {
            db,
            poisoned_link: "https://example.com/bad",
        };

        let err = commit(&store, &normalized("https://example.com/bad"), feed_id)
            .await
            .unwrap_err();
        assert_eq!(err.link, "https://example.com/bad");
        assert!(!err.source.is_unique_violation());
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let (db, feed_id) = setup().await;
        let entries: Vec<_> = (1..=3).map(raw).collect();
        let dates = DateParser::default();

        let first = ingest_entries(&db, &dates, feed_id, &entries).await;
        assert_eq!(
            first,
            IngestReport {
                committed: 3,
                ..IngestReport::default()
            }
        );
        let before = db.posts_for_feed(feed_id).await.unwrap();

        let second = ingest_entries(&db, &dates, feed_id, &entries).await;
        assert_eq!(
            second,
            IngestReport {
                skipped: 3,
                ..IngestReport::default()
            }
        );
        assert_eq!(db.posts_for_feed(feed_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_bad_date_skips_only_that_entry() {
        let (db, feed_id) = setup().await;
        let mut entries: Vec<_> = (1..=5).map(raw).collect();
        entries[2].pub_date = "not-a-date".to_string();

        let report = ingest_entries(&db, &DateParser::default(), feed_id, &entries).await;
        assert_eq!(report.committed, 4);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.total(), 5);

        let links: Vec<_> = db
            .posts_for_feed(feed_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert!(!links.contains(&"https://example.com/3".to_string()));
    }

    #[tokio::test]
    async fn test_storage_failure_skips_only_that_entry() {
        let (db, feed_id) = setup().await;
        let store = FailingStore {
            db: db.clone(),
            poisoned_link: "https://example.com/2",
        };
        let entries: Vec<_> = (1..=3).map(raw).collect();

        let report = ingest_entries(&store, &DateParser::default(), feed_id, &entries).await;
        assert_eq!(
            report,
            IngestReport {
                committed: 2,
                failed: 1,
                ..IngestReport::default()
            }
        );
        assert_eq!(db.count_posts().await.unwrap(), 2);
    }
}
