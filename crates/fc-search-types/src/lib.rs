//! # fc-search-types
//!
//! Shared domain types for fc-search.
//!
//! This crate defines the data structures used throughout the system:
//! - Records: immutable packages and configuration options of one channel
//! - Channel bookkeeping: refresh outcomes and persisted registry entries
//! - Settings: layered daemon configuration
//!
//! ## Usage
//!
//! ```rust
//! use fc_search_types::{Record, RecordKind};
//!
//! let kind: RecordKind = "package".parse().unwrap();
//! assert_eq!(kind, RecordKind::Package);
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod record;

pub use channel::{ChannelRecord, RefreshOutcome, RefreshState, Revisions};
pub use config::{RefreshSettings, Settings};
pub use error::ConfigError;
pub use record::{License, OptionRecord, PackageRecord, Record, RecordKind, SearchFields};
