//! # fc-search-feed
//!
//! Turns a channel's two feed documents (`options.json`, `packages.json`)
//! into validated [`Record`](fc_search_types::Record) sets.
//!
//! ## Features
//! - Per-entry validation: malformed, identity-less and duplicate entries are
//!   skipped and reported, never fatal
//! - Only a top-level parse failure aborts a load (`FeedError::Unparsable`)
//! - Feed sources: plain directories, an external producer command, or an
//!   in-memory map for tests

mod entries;
pub mod error;
pub mod loader;
pub mod source;

pub use error::{Document, FeedError};
pub use loader::{load_feed, load_options, load_packages, LoadResult, SkipCounts, SkipReason, SkippedEntry};
pub use source::{
    read_feed_dir, CommandFeedSource, DirectoryFeedSource, FeedSource, MemoryFeedSource, RawFeed,
};
