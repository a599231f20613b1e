//! Periodic feed polling.
//!
//! Each tick claims the least recently polled feed, fetches and parses its
//! document, ingests the entries and stamps the feed so it moves to the back
//! of the queue. Ticks never overlap: a slow tick delays the next one.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::feed::{
    ingest_entries, parse_document, DateParser, FetchError, Fetcher, IngestReport, ParseError,
};
use crate::storage::{Feed, FeedStore, StoreError};

/// `tokio::time::interval` panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Why a claimed feed produced no entries this tick
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// What happened to the feed claimed by a tick
#[derive(Debug)]
pub struct FeedReport {
    pub feed: Feed,
    pub result: Result<IngestReport, PollError>,
    /// False if the last-fetched stamp could not be written
    pub stamped: bool,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// There are no feeds to poll
    Idle,
    /// The claim query failed; nothing was fetched
    ClaimFailed(StoreError),
    /// Shutdown interrupted the fetch; the feed was left unstamped
    Cancelled { feed_id: i64 },
    /// A feed went through the pipeline
    Polled(FeedReport),
}

/// Stops a running [`Scheduler`]. Cloneable; any clone can fire it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the scheduler to stop. An in-flight fetch is abandoned.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Resolves once shutdown is requested; never if every handle was dropped.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Single-worker poll loop over a [`FeedStore`].
///
/// Assumes it is the only scheduler against the store: claim and stamp are
/// separate writes, so two instances could poll the same feed twice.
pub struct Scheduler<S> {
    store: S,
    fetcher: Fetcher,
    dates: DateParser,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(
        store: S,
        fetcher: Fetcher,
        dates: DateParser,
        interval: Duration,
    ) -> (Self, ShutdownHandle) {
        let (tx, rx) = watch::channel(false);
        let scheduler = Self {
            store,
            fetcher,
            dates,
            interval: interval.max(MIN_INTERVAL),
            shutdown: rx,
        };
        (scheduler, ShutdownHandle { tx: Arc::new(tx) })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll one feed: claim, fetch, parse, ingest, stamp.
    ///
    /// Fetch and parse failures are logged and the feed is still stamped, so
    /// a broken feed cannot hold the head of the queue. Only a shutdown
    /// during the fetch leaves the feed unstamped.
    pub async fn tick(&self) -> TickOutcome {
        let feed = match self.store.next_feed_to_fetch().await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                info!("No feeds to fetch");
                return TickOutcome::Idle;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim next feed");
                return TickOutcome::ClaimFailed(e);
            }
        };

        info!(feed_id = feed.id, name = %feed.name, url = %feed.url, "Fetching feed");

        let fetched = tokio::select! {
            biased;
            _ = cancelled(self.shutdown.clone()) => {
                info!(feed_id = feed.id, "Fetch cancelled by shutdown, feed left unstamped");
                return TickOutcome::Cancelled { feed_id: feed.id };
            }
            result = self.fetcher.fetch(&feed.url) => result,
        };

        let parsed = fetched
            .map_err(PollError::from)
            .and_then(|bytes| parse_document(&bytes).map_err(PollError::from));

        let result = match parsed {
            Ok(document) => {
                debug!(
                    feed_id = feed.id,
                    channel = %document.title,
                    entries = document.entries.len(),
                    "Parsed feed document"
                );
                let entries = &document.entries;
                let report = ingest_entries(&self.store, &self.dates, feed.id, entries).await;
                Ok(report)
            }
            Err(e) => {
                warn!(feed_id = feed.id, url = %feed.url, error = %e, "Failed to poll feed");
                Err(e)
            }
        };

        let stamped = match self.store.mark_feed_fetched(feed.id, Utc::now()).await {
            Ok(()) => true,
            Err(e) => {
                error!(feed_id = feed.id, error = %e, "Failed to mark feed fetched");
                false
            }
        };

        if let Ok(report) = &result {
            info!(
                feed_id = feed.id,
                committed = report.committed,
                skipped = report.skipped,
                invalid = report.invalid,
                failed = report.failed,
                "Feed processed"
            );
        }

        TickOutcome::Polled(FeedReport {
            feed,
            result,
            stamped,
        })
    }

    /// Tick immediately, then once per interval, until shutdown.
    pub async fn run(self) {
        info!(interval = ?self.interval, "Scheduler started");

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(self.shutdown.clone()) => break,
                _ = timer.tick() => {}
            }

            if let TickOutcome::Cancelled { .. } = self.tick().await {
                break;
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetcherOptions;
    use crate::storage::{NewPost, Post};
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Empty store that counts claims
    #[derive(Default)]
    struct CountingStore {
        claims: AtomicUsize,
    }

    impl FeedStore for CountingStore {
        async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, StoreError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn mark_feed_fetched(
            &self,
            _feed_id: i64,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_post(&self, _post: &NewPost) -> Result<Post, StoreError> {
            Err(StoreError::Other(sqlx::Error::RowNotFound))
        }
    }

    fn scheduler(
        store: Arc<CountingStore>,
        interval: Duration,
    ) -> (Scheduler<Arc<CountingStore>>, ShutdownHandle) {
        let fetcher = Fetcher::new(&FetcherOptions::default()).unwrap();
        Scheduler::new(store, fetcher, DateParser::default(), interval)
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let (scheduler, _handle) = scheduler(Arc::default(), Duration::ZERO);
        assert_eq!(scheduler.interval(), MIN_INTERVAL);
    }

    #[tokio::test]
    async fn test_tick_without_feeds_is_idle() {
        let store = Arc::new(CountingStore::default());
        let (scheduler, _handle) = scheduler(store.clone(), Duration::from_secs(60));

        assert!(matches!(scheduler.tick().await, TickOutcome::Idle));
        assert_eq!(store.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_immediately_then_every_interval() {
        let store = Arc::new(CountingStore::default());
        let (scheduler, handle) = scheduler(store.clone(), Duration::from_secs(30));

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(95)).await;
        handle.shutdown();
        task.await.unwrap();

        // t = 0, 30, 60, 90
        assert_eq!(store.claims.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_run_claims_nothing() {
        let store = Arc::new(CountingStore::default());
        let (scheduler, handle) = scheduler(store.clone(), Duration::from_secs(30));

        handle.shutdown();
        scheduler.run().await;

        assert_eq!(store.claims.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_does_not_stop_the_loop() {
        let store = Arc::new(CountingStore::default());
        let (scheduler, handle) = scheduler(store.clone(), Duration::from_secs(10));
        drop(handle);

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        task.abort();

        assert_eq!(store.claims.load(Ordering::SeqCst), 3);
    }
}
