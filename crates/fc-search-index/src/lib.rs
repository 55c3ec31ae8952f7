//! # fc-search-index
//!
//! In-memory search for fc-search channels.
//!
//! ## Features
//! - Immutable [`ChannelIndex`] per build: gram postings for substring
//!   lookup, a sorted segment table for dotted-path prefixes, exact identity
//!   map
//! - Deterministic ranking by [`MatchClass`], then identity length, then
//!   identity
//! - [`ChannelRegistry`] with lock-free reads and sequence-ordered atomic
//!   publication
//! - [`QueryEngine`] answering each query from exactly one snapshot
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use fc_search_feed::{load_feed, RawFeed};
//! use fc_search_index::{ChannelIndex, ChannelRegistry, QueryEngine};
//!
//! let registry = Arc::new(ChannelRegistry::new());
//! registry.register("dev", Default::default());
//!
//! let load = load_feed(&RawFeed::new("dev", "{}", r#"{"nginx": {}}"#)).unwrap();
//! registry.publish(Arc::new(ChannelIndex::build("dev", 1, load))).unwrap();
//!
//! let engine = QueryEngine::new(registry);
//! let page = engine.search("dev", "ngi", None).unwrap();
//! assert_eq!(page.total, 1);
//! ```

pub mod error;
pub mod index;
pub mod query;
mod rank;
pub mod registry;

pub use error::{QueryError, RegistryError};
pub use index::{ChannelIndex, Match};
pub use query::{Hit, Page, QueryEngine, Readiness, SearchOptions, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
pub use rank::MatchClass;
pub use registry::{ChannelRegistry, ChannelStatus, IndexHandle, PublishOutcome};
