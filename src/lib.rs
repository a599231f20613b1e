//! gator: a command-line RSS aggregator.
//!
//! Feeds are registered in a SQLite store and polled one at a time by the
//! [`scheduler`]; each poll runs the [`feed`] pipeline and records new posts
//! in [`storage`], deduplicated by link.

pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
