//! Bookkeeping store for fc-search.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for channel records and the refresh log
//! - Time-prefixed log keys for newest-first scans
//! - Atomic record + log writes via WriteBatch
//!
//! Only operational state lives here; channel indexes are rebuilt from their
//! feeds on every start.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{RefreshLogEntry, Storage, DEFAULT_REFRESH_LOG_LIMIT};
pub use error::StorageError;
pub use keys::{ChannelKey, RefreshLogKey};
