//! Column family definitions for RocksDB.
//!
//! - channels: one bookkeeping record per channel (default compaction)
//! - refresh_log: bounded per-channel history of refresh outcomes

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for channel bookkeeping records
pub const CF_CHANNELS: &str = "channels";

/// Column family name for the refresh history
pub const CF_REFRESH_LOG: &str = "refresh_log";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_CHANNELS, CF_REFRESH_LOG];

fn refresh_log_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_CHANNELS, Options::default()),
        ColumnFamilyDescriptor::new(CF_REFRESH_LOG, refresh_log_options()),
    ]
}
