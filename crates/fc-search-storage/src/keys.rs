//! Key encoding and decoding for the bookkeeping store.
//!
//! - channel records: `chan:{channel}`
//! - refresh log: `refresh:{channel}:{timestamp_ms:013}:{seq:020}`
//!
//! The zero-padded timestamp orders one channel's log entries by time, so
//! the newest entries are found by a reverse scan over the channel prefix.
//! `seq` separates entries written within the same millisecond.

use crate::error::StorageError;

/// Key of a channel bookkeeping record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKey {
    pub channel: String,
}

impl ChannelKey {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("chan:{}", self.channel).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let channel = s
            .strip_prefix("chan:")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| StorageError::Key(format!("Invalid channel key format: {}", s)))?;
        Ok(Self::new(channel))
    }
}

/// Key of one refresh log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshLogKey {
    pub channel: String,
    /// Finish time of the attempt in milliseconds
    pub timestamp_ms: i64,
    /// Store-wide write counter
    pub seq: u64,
}

impl RefreshLogKey {
    pub fn new(channel: impl Into<String>, timestamp_ms: i64, seq: u64) -> Self {
        Self {
            channel: channel.into(),
            timestamp_ms: timestamp_ms.max(0),
            seq,
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "refresh:{}:{:013}:{:020}",
            self.channel, self.timestamp_ms, self.seq
        )
        .into_bytes()
    }

    /// Common prefix of all log keys of `channel`. Channel names never
    /// contain ':', so no other channel's keys share it.
    pub fn channel_prefix(channel: &str) -> Vec<u8> {
        format!("refresh:{}:", channel).into_bytes()
    }

    /// First key sorting after every log key of `channel`.
    pub fn channel_upper_bound(channel: &str) -> Vec<u8> {
        // ';' is the byte after ':'
        format!("refresh:{};", channel).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        Self::parse(s)
    }

    fn parse(s: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::Key(format!("Invalid refresh log key format: {}", s));

        let rest = s.strip_prefix("refresh:").ok_or_else(invalid)?;
        // channel names may not contain ':', but parse from the right anyway
        let mut parts = rest.rsplitn(3, ':');
        let seq = parts.next().ok_or_else(invalid)?;
        let timestamp = parts.next().ok_or_else(invalid)?;
        let channel = parts.next().filter(|c| !c.is_empty()).ok_or_else(invalid)?;

        let timestamp_ms: i64 = timestamp
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        let seq: u64 = seq
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;

        Ok(Self {
            channel: channel.to_string(),
            timestamp_ms,
            seq,
        })
    }
}
