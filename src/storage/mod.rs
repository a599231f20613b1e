//! SQLite persistence for feeds and posts.
//!
//! The polling pipeline reaches storage only through [`FeedStore`]; the CLI
//! uses the inherent [`Database`] methods directly for registration and
//! browsing.

mod feeds;
mod posts;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::{Feed, NewPost, Post, StoreError};
