//! RocksDB wrapper for fc-search bookkeeping.
//!
//! Provides:
//! - Database open with column family setup
//! - Channel records (last good sequence, last refresh, last outcome)
//! - A per-channel refresh log, bounded by pruning
//! - Atomic record + log writes via WriteBatch
//!
//! The searchable index is never stored here.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fc_search_types::{ChannelRecord, RefreshOutcome};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_CHANNELS, CF_REFRESH_LOG};
use crate::error::StorageError;
use crate::keys::{ChannelKey, RefreshLogKey};

/// Log entries kept per channel by [`Storage::record_refresh`].
pub const DEFAULT_REFRESH_LOG_LIMIT: usize = 100;

/// One persisted refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshLogEntry {
    pub channel: String,
    pub at: DateTime<Utc>,
    pub outcome: RefreshOutcome,
}

/// Bookkeeping store
pub struct Storage {
    db: DB,
    /// Refresh log write counter
    log_sequence: AtomicU64,
    refresh_log_limit: usize,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!(path = %path.display(), "Opening bookkeeping store");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let log_sequence = Self::load_log_sequence(&db)?;

        Ok(Self {
            db,
            log_sequence: AtomicU64::new(log_sequence),
            refresh_log_limit: DEFAULT_REFRESH_LOG_LIMIT,
        })
    }

    /// Override how many log entries per channel survive pruning.
    pub fn with_refresh_log_limit(mut self, limit: usize) -> Self {
        self.refresh_log_limit = limit.max(1);
        self
    }

    /// Next free log sequence: one past the highest stored one.
    fn load_log_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_REFRESH_LOG)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_REFRESH_LOG.to_string()))?;

        // keys order by channel and time, not by seq; the log is bounded
        let mut next = 0;
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let key = RefreshLogKey::from_bytes(&key)?;
            next = next.max(key.seq + 1);
        }
        Ok(next)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Channel Records ====================

    /// Store a channel record, replacing any previous one.
    pub fn put_channel(&self, record: &ChannelRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHANNELS)?;
        let value = serde_json::to_vec(record)?;
        self.db
            .put_cf(cf, ChannelKey::new(&record.name).to_bytes(), value)?;
        Ok(())
    }

    pub fn get_channel(&self, channel: &str) -> Result<Option<ChannelRecord>, StorageError> {
        let cf = self.cf(CF_CHANNELS)?;
        let key = ChannelKey::new(channel).to_bytes();
        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// All channel records, ordered by name.
    ///
    /// # Errors
    ///
    /// `Corrupt` if any key or value does not decode.
    pub fn load_channels(&self) -> Result<Vec<ChannelRecord>, StorageError> {
        let cf = self.cf(CF_CHANNELS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let channel_key = ChannelKey::from_bytes(&key).map_err(|e| StorageError::Corrupt {
                key: String::from_utf8_lossy(&key).into_owned(),
                reason: e.to_string(),
            })?;
            let record: ChannelRecord = decode(&key, &value)?;
            if record.name != channel_key.channel {
                return Err(StorageError::Corrupt {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    reason: format!("record is for channel `{}`", record.name),
                });
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Remove a channel record and its refresh log.
    pub fn delete_channel(&self, channel: &str) -> Result<(), StorageError> {
        let channels_cf = self.cf(CF_CHANNELS)?;
        let log_cf = self.cf(CF_REFRESH_LOG)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(channels_cf, ChannelKey::new(channel).to_bytes());
        for key in self.log_keys(channel)? {
            batch.delete_cf(log_cf, key);
        }
        self.db.write(batch)?;
        debug!(channel, "Deleted channel bookkeeping");
        Ok(())
    }

    // ==================== Refresh Log ====================

    /// Persist a refresh outcome: the updated channel record and a log entry,
    /// in one atomic write. Older log entries beyond the limit are pruned.
    pub fn record_refresh(
        &self,
        record: &ChannelRecord,
        entry: &RefreshLogEntry,
    ) -> Result<(), StorageError> {
        let channels_cf = self.cf(CF_CHANNELS)?;
        let log_cf = self.cf(CF_REFRESH_LOG)?;

        let key = RefreshLogKey::new(
            &entry.channel,
            entry.at.timestamp_millis(),
            self.log_sequence.fetch_add(1, Ordering::SeqCst),
        );

        let mut batch = WriteBatch::default();
        batch.put_cf(
            channels_cf,
            ChannelKey::new(&record.name).to_bytes(),
            serde_json::to_vec(record)?,
        );
        batch.put_cf(log_cf, key.to_bytes(), serde_json::to_vec(entry)?);
        self.db.write(batch)?;

        let pruned = self.prune_refresh_log(&entry.channel, self.refresh_log_limit)?;
        debug!(
            channel = %entry.channel,
            seq = key.seq,
            pruned,
            "Recorded refresh"
        );
        Ok(())
    }

    /// Newest log entries of `channel`, newest first.
    pub fn recent_refreshes(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<RefreshLogEntry>, StorageError> {
        let cf = self.cf(CF_REFRESH_LOG)?;
        let prefix = RefreshLogKey::channel_prefix(channel);
        let upper = RefreshLogKey::channel_upper_bound(channel);

        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.as_ref() >= upper.as_slice() {
                continue;
            }
            if !key.starts_with(&prefix) {
                break;
            }
            results.push(decode(&key, &value)?);
        }
        Ok(results)
    }

    /// Delete all but the newest `keep` log entries of `channel`.
    ///
    /// Returns the number of deleted entries.
    pub fn prune_refresh_log(&self, channel: &str, keep: usize) -> Result<usize, StorageError> {
        let cf = self.cf(CF_REFRESH_LOG)?;
        let keys = self.log_keys(channel)?;
        if keys.len() <= keep {
            return Ok(0);
        }

        let excess = keys.len() - keep;
        let mut batch = WriteBatch::default();
        for key in keys.iter().take(excess) {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(excess)
    }

    /// Log keys of `channel`, oldest first.
    fn log_keys(&self, channel: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_REFRESH_LOG)?;
        let prefix = RefreshLogKey::channel_prefix(channel);

        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    // ===== Admin Operations =====

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &[u8], value: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(value).map_err(|e| StorageError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}
