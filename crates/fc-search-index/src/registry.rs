//! Channel registry: the live index of every known channel.
//!
//! Each channel owns a slot holding an `ArcSwapOption<ChannelIndex>`.
//! Readers take a reference-counted handle with `load_full` and never wait
//! on a writer; a superseded index is freed when its last handle drops.
//! Publishing is a compare-and-swap loop that refuses to lower the visible
//! build sequence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fc_search_types::{ChannelRecord, RefreshOutcome, RefreshState, Revisions};

use crate::error::RegistryError;
use crate::index::ChannelIndex;

/// Shared handle to an immutable index snapshot.
pub type IndexHandle = Arc<ChannelIndex>;

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub sequence: u64,
    /// Sequence of the snapshot that was replaced, if any.
    pub replaced: Option<u64>,
}

/// Operational view of one channel, as shown in channel listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub name: String,
    /// Sequence of the visible snapshot; `None` until the first build.
    pub sequence: Option<u64>,
    pub records: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    /// Highest sequence ever published, including restored bookkeeping.
    pub last_good_sequence: Option<u64>,
    pub state: RefreshState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_outcome: Option<RefreshOutcome>,
    pub revisions: Revisions,
}

impl ChannelStatus {
    pub fn is_ready(&self) -> bool {
        self.sequence.is_some()
    }
}

#[derive(Debug, Default)]
struct Bookkeeping {
    state: RefreshState,
    last_good_sequence: Option<u64>,
    last_refresh: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_outcome: Option<RefreshOutcome>,
    revisions: Revisions,
}

#[derive(Debug, Default)]
struct ChannelSlot {
    current: ArcSwapOption<ChannelIndex>,
    /// Last allocated build sequence.
    allocated: AtomicU64,
    bookkeeping: RwLock<Bookkeeping>,
}

/// Registry of channels and their live snapshots.
///
/// Created empty at startup and shared by the query engine and the refresh
/// scheduler.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<String, Arc<ChannelSlot>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a channel known. Registering an existing channel only merges
    /// `revisions` into its entry.
    pub fn register(&self, channel: &str, revisions: Revisions) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let slot = channels.entry(channel.to_string()).or_default();
        let mut bookkeeping = slot
            .bookkeeping
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        bookkeeping.revisions.extend(revisions);
        debug!(channel, "Registered channel");
    }

    /// Restore a channel's bookkeeping from its persisted record.
    ///
    /// Seeds the sequence counter so new builds continue above the last good
    /// one. No snapshot becomes visible; the index is always rebuilt.
    pub fn restore(&self, record: &ChannelRecord) {
        self.register(&record.name, record.revisions.clone());
        if let Some(slot) = self.slot(&record.name) {
            if let Some(sequence) = record.last_good_sequence {
                slot.allocated.fetch_max(sequence, Ordering::SeqCst);
            }
            let mut bookkeeping = slot
                .bookkeeping
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            bookkeeping.last_good_sequence = record.last_good_sequence;
            bookkeeping.last_refresh = record.last_refresh;
            bookkeeping.last_success = record.last_success;
            bookkeeping.last_outcome = record.last_outcome.clone();
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.slot(channel).is_some()
    }

    /// Current snapshot of `channel`, or `None` if the channel is unknown or
    /// has never built successfully.
    pub fn get(&self, channel: &str) -> Option<IndexHandle> {
        self.slot(channel)?.current.load_full()
    }

    /// Allocate the next build sequence for `channel`.
    pub fn next_sequence(&self, channel: &str) -> Result<u64, RegistryError> {
        let slot = self.require(channel)?;
        Ok(slot.allocated.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Atomically make `index` the visible snapshot of its channel.
    ///
    /// # Errors
    ///
    /// `Stale` if the visible snapshot has an equal or higher sequence; the
    /// visible snapshot is left untouched. `UnknownChannel` if the channel
    /// was never registered.
    pub fn publish(&self, index: IndexHandle) -> Result<PublishOutcome, RegistryError> {
        let channel = index.channel().to_string();
        let slot = self.require(&channel)?;
        let sequence = index.sequence();

        let replaced = loop {
            let old = slot.current.load_full();
            if let Some(visible) = &old {
                if sequence <= visible.sequence() {
                    return Err(RegistryError::Stale {
                        channel,
                        sequence,
                        visible: visible.sequence(),
                    });
                }
            }

            let prev = slot.current.compare_and_swap(&old, Some(index.clone()));
            if same_snapshot(&prev, &old) {
                break old.map(|visible| visible.sequence());
            }
            // lost the race against another publish; re-check against it
        };

        slot.allocated.fetch_max(sequence, Ordering::SeqCst);
        {
            let mut bookkeeping = slot
                .bookkeeping
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // a racing publish of a higher sequence may already be recorded
            if bookkeeping.last_good_sequence < Some(sequence) {
                bookkeeping.last_good_sequence = Some(sequence);
                bookkeeping.revisions = index.revisions().clone();
            }
        }

        info!(
            channel = %channel,
            sequence,
            replaced = ?replaced,
            records = index.len(),
            "Published channel index"
        );
        Ok(PublishOutcome { sequence, replaced })
    }

    /// Record the outcome of a refresh attempt finished at `at`.
    pub fn record_outcome(
        &self,
        channel: &str,
        outcome: RefreshOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let slot = self.require(channel)?;
        let mut bookkeeping = slot
            .bookkeeping
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        bookkeeping.last_refresh = Some(at);
        if outcome.is_success() {
            bookkeeping.last_success = Some(at);
        }
        bookkeeping.last_outcome = Some(outcome);
        Ok(())
    }

    pub fn set_refreshing(&self, channel: &str, state: RefreshState) -> Result<(), RegistryError> {
        let slot = self.require(channel)?;
        slot.bookkeeping
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
        Ok(())
    }

    /// Status of one channel.
    pub fn status(&self, channel: &str) -> Option<ChannelStatus> {
        let slot = self.slot(channel)?;
        Some(Self::status_of(channel, &slot))
    }

    /// All known channels, sorted by name.
    pub fn list_channels(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .iter()
            .map(|(name, slot)| Self::status_of(name, slot))
            .collect()
    }

    /// Bookkeeping of `channel` in its persisted form.
    pub fn channel_record(&self, channel: &str) -> Option<ChannelRecord> {
        let status = self.status(channel)?;
        Some(ChannelRecord {
            name: status.name,
            last_good_sequence: status.last_good_sequence,
            last_refresh: status.last_refresh,
            last_success: status.last_success,
            last_outcome: status.last_outcome,
            revisions: status.revisions,
        })
    }

    fn status_of(name: &str, slot: &ChannelSlot) -> ChannelStatus {
        let current = slot.current.load_full();
        let bookkeeping = slot
            .bookkeeping
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        ChannelStatus {
            name: name.to_string(),
            sequence: current.as_ref().map(|index| index.sequence()),
            records: current.as_ref().map(|index| index.len()),
            built_at: current.as_ref().map(|index| index.built_at()),
            last_good_sequence: bookkeeping.last_good_sequence,
            state: bookkeeping.state,
            last_refresh: bookkeeping.last_refresh,
            last_success: bookkeeping.last_success,
            last_outcome: bookkeeping.last_outcome.clone(),
            revisions: bookkeeping.revisions.clone(),
        }
    }

    fn slot(&self, channel: &str) -> Option<Arc<ChannelSlot>> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels.get(channel).cloned()
    }

    fn require(&self, channel: &str) -> Result<Arc<ChannelSlot>, RegistryError> {
        self.slot(channel)
            .ok_or_else(|| RegistryError::UnknownChannel(channel.to_string()))
    }
}

fn same_snapshot(a: &Option<IndexHandle>, b: &Option<IndexHandle>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_search_feed::{load_feed, RawFeed};

    fn index(channel: &str, sequence: u64, packages: &str) -> IndexHandle {
        let load = load_feed(&RawFeed::new(channel, "{}", packages)).unwrap();
        Arc::new(ChannelIndex::build(channel, sequence, load))
    }

    #[test]
    fn test_unknown_and_unbuilt() {
        let registry = ChannelRegistry::new();
        assert!(registry.get("dev").is_none());
        assert!(!registry.contains("dev"));

        registry.register("dev", Revisions::new());
        assert!(registry.contains("dev"));
        assert!(registry.get("dev").is_none());
        assert!(!registry.status("dev").unwrap().is_ready());
    }

    #[test]
    fn test_publish_requires_registration() {
        let registry = ChannelRegistry::new();
        assert_eq!(
            registry.publish(index("dev", 1, "{}")),
            Err(RegistryError::UnknownChannel("dev".to_string()))
        );
    }

    #[test]
    fn test_monotonic_publish() {
        let registry = ChannelRegistry::new();
        registry.register("dev", Revisions::new());

        let outcome = registry.publish(index("dev", 2, r#"{"a": {}}"#)).unwrap();
        assert_eq!(outcome, PublishOutcome { sequence: 2, replaced: None });

        let late = registry.publish(index("dev", 1, r#"{"b": {}}"#));
        assert!(matches!(
            late,
            Err(RegistryError::Stale {
                sequence: 1,
                visible: 2,
                ..
            })
        ));
        assert!(registry.publish(index("dev", 2, "{}")).is_err());
        assert_eq!(registry.get("dev").unwrap().sequence(), 2);

        let outcome = registry.publish(index("dev", 5, "{}")).unwrap();
        assert_eq!(outcome.replaced, Some(2));
        assert_eq!(registry.get("dev").unwrap().sequence(), 5);
        // counter never hands out a sequence below a published one
        assert_eq!(registry.next_sequence("dev").unwrap(), 6);
    }

    #[test]
    fn test_old_handle_survives_publish() {
        let registry = ChannelRegistry::new();
        registry.register("dev", Revisions::new());
        registry.publish(index("dev", 1, r#"{"old": {}}"#)).unwrap();

        let held = registry.get("dev").unwrap();
        registry.publish(index("dev", 2, r#"{"new": {}}"#)).unwrap();

        assert_eq!(held.sequence(), 1);
        assert!(held.lookup(fc_search_types::RecordKind::Package, "old").is_some());
        assert_eq!(registry.get("dev").unwrap().sequence(), 2);
    }

    #[test]
    fn test_sequences() {
        let registry = ChannelRegistry::new();
        assert!(registry.next_sequence("dev").is_err());
        registry.register("dev", Revisions::new());
        assert_eq!(registry.next_sequence("dev").unwrap(), 1);
        assert_eq!(registry.next_sequence("dev").unwrap(), 2);
    }

    #[test]
    fn test_list_channels_sorted_with_outcomes() {
        let registry = ChannelRegistry::new();
        registry.register("fc-24.11-production", Revisions::new());
        registry.register("fc-24.11-dev", Revisions::new());

        let at = Utc::now();
        registry
            .record_outcome(
                "fc-24.11-dev",
                RefreshOutcome::Failed {
                    reason: "packages.json unparsable".to_string(),
                },
                at,
            )
            .unwrap();
        registry
            .set_refreshing("fc-24.11-production", RefreshState::Refreshing)
            .unwrap();

        let list = registry.list_channels();
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fc-24.11-dev", "fc-24.11-production"]);
        assert_eq!(list[0].last_refresh, Some(at));
        assert_eq!(list[0].last_success, None);
        assert!(list[0].last_outcome.as_ref().unwrap().is_failure());
        assert_eq!(list[1].state, RefreshState::Refreshing);
    }

    #[test]
    fn test_restore_seeds_sequence() {
        let registry = ChannelRegistry::new();
        let mut record = ChannelRecord::new("dev");
        record.last_good_sequence = Some(12);
        record.revisions.insert("nixpkgs".to_string(), "abc".to_string());
        registry.restore(&record);

        assert!(registry.get("dev").is_none());
        assert_eq!(registry.next_sequence("dev").unwrap(), 13);
        let status = registry.status("dev").unwrap();
        assert_eq!(status.revisions["nixpkgs"], "abc");

        let round = registry.channel_record("dev").unwrap();
        assert_eq!(round.last_good_sequence, Some(12));

        registry.publish(index("dev", 13, "{}")).unwrap();
        assert_eq!(registry.channel_record("dev").unwrap().last_good_sequence, Some(13));
    }

    #[test]
    fn test_concurrent_publishers_keep_highest() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.register("dev", Revisions::new());

        let handles: Vec<_> = (1..=16u64)
            .map(|sequence| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let _ = registry.publish(index("dev", sequence, r#"{"x": {}}"#));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get("dev").unwrap().sequence(), 16);
    }
}
