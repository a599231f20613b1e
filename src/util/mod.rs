//! Small parsing helpers used by the command line.
//!
//! - **Intervals**: Go-style durations (`30s`, `1h30m`) for the poll period
//! - **Feed URLs**: scheme and host checks before a feed is registered
//!
//! # Examples
//!
//! ```
//! use gator::util::{parse_interval, validate_feed_url};
//! use std::time::Duration;
//!
//! assert_eq!(parse_interval("1m30s").unwrap(), Duration::from_secs(90));
//! assert!(validate_feed_url("ftp://example.com/feed").is_err());
//! ```

mod duration;
mod feed_url;

pub use duration::{parse_interval, IntervalError};
pub use feed_url::{validate_feed_url, FeedUrlError};
