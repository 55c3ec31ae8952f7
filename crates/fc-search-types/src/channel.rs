//! Channel bookkeeping types.
//!
//! These describe the operational state of a channel (refresh outcomes,
//! revisions of upstream inputs). They are shared by the in-memory registry
//! and the persistent bookkeeping store; the searchable index itself is never
//! persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Revision identifiers of a channel's upstream inputs, keyed by input name.
pub type Revisions = BTreeMap<String, String>;

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new index was built and published.
    Success {
        sequence: u64,
        records: usize,
        skipped: usize,
    },
    /// Fetching or parsing the feed failed; the previous snapshot stays live.
    Failed { reason: String },
    /// The attempt exceeded its time budget and was abandoned.
    TimedOut { after_secs: u64 },
    /// The build finished after a newer one had been published.
    Superseded { sequence: u64, visible: u64 },
    /// Upstream revisions match the visible snapshot; nothing was fetched.
    UpToDate { sequence: u64 },
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RefreshOutcome::Failed { .. } | RefreshOutcome::TimedOut { .. }
        )
    }
}

/// Per-channel refresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
    /// Refreshing, and one more trigger arrived meanwhile.
    RefreshingWithPending,
}

impl RefreshState {
    pub fn is_refreshing(&self) -> bool {
        !matches!(self, RefreshState::Idle)
    }
}

/// Persisted registry entry, used to restore bookkeeping across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    #[serde(default)]
    pub last_good_sequence: Option<u64>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_outcome: Option<RefreshOutcome>,
    #[serde(default)]
    pub revisions: Revisions,
}

impl ChannelRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_good_sequence: None,
            last_refresh: None,
            last_success: None,
            last_outcome: None,
            revisions: Revisions::new(),
        }
    }

    /// Fold a refresh outcome into the record.
    pub fn apply_outcome(&mut self, outcome: &RefreshOutcome, at: DateTime<Utc>) {
        self.last_refresh = Some(at);
        if let RefreshOutcome::Success { sequence, .. } = outcome {
            self.last_success = Some(at);
            self.last_good_sequence = Some(
                self.last_good_sequence
                    .map_or(*sequence, |prev| prev.max(*sequence)),
            );
        }
        self.last_outcome = Some(outcome.clone());
    }
}
