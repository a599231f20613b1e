//! The fetch → parse → normalize → commit stages of the polling pipeline.
//!
//! - [`fetcher`] - one HTTP GET per feed, size and time limited
//! - [`parser`] - RSS `channel`/`item` decoding with HTML unescaping
//! - [`dates`] - ordered publish-date formats
//! - [`ingest`] - committing entries, deduplicated by link
//!
//! The [`crate::scheduler`] drives these stages once per tick.

pub mod dates;
pub mod fetcher;
pub mod ingest;
pub mod parser;

pub use dates::{DateFormat, DateFormatError, DateParseError, DateParser};
pub use fetcher::{FetchError, Fetcher, FetcherOptions};
pub use ingest::{
    commit, ingest_entries, CommitError, CommitOutcome, IngestReport, NormalizedEntry,
};
pub use parser::{parse_document, ParseError, RawEntry, RawFeedDocument};
