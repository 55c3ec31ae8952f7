//! Refresh worker: fetch, load, build and publish one channel.
//!
//! Every attempt allocates a build sequence first, so publish order follows
//! start order; a slow attempt finishing after a newer one is recorded as
//! superseded and never replaces the newer snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use fc_search_feed::{load_feed, FeedError, FeedSource};
use fc_search_index::{ChannelIndex, ChannelRegistry, RegistryError};
use fc_search_storage::{RefreshLogEntry, Storage};
use fc_search_types::{RecordKind, RefreshOutcome, Revisions};

use crate::config::SchedulerConfig;
use crate::error::{RefreshError, SchedulerError};
use crate::gate::{Admission, RefreshGate};

/// What a call to [`RefreshWorker::refresh_channel`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReport {
    /// The call ran the refresh (and any refresh queued meanwhile); carries
    /// the outcome of the last attempt.
    Completed(RefreshOutcome),
    /// Another refresh was running; one more run was queued behind it.
    Queued,
    /// A run was already queued; this trigger merged into it.
    Coalesced,
    /// Another refresh was running and the overlap policy drops triggers.
    Skipped,
}

/// Runs refreshes for a fixed set of channels.
pub struct RefreshWorker {
    registry: Arc<ChannelRegistry>,
    source: Arc<dyn FeedSource>,
    store: Option<Arc<Storage>>,
    gates: BTreeMap<String, Arc<RefreshGate>>,
    refresh_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RefreshWorker {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        source: Arc<dyn FeedSource>,
        channels: &[String],
        config: &SchedulerConfig,
    ) -> Self {
        let gates = channels
            .iter()
            .map(|channel| {
                let observed = Arc::clone(&registry);
                let name = channel.clone();
                let gate = RefreshGate::with_observer(config.overlap, move |state| {
                    // the channel is registered by `restore` before any trigger
                    let _ = observed.set_refreshing(&name, state);
                });
                (channel.clone(), gate)
            })
            .collect();

        Self {
            registry,
            source,
            store: None,
            gates,
            refresh_timeout: config.refresh_timeout,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Persist outcomes and restore bookkeeping through `store`.
    pub fn with_store(mut self, store: Arc<Storage>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Configured channels, sorted by name.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.gates.keys().map(String::as_str)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Register every configured channel, seeding bookkeeping from the store
    /// where a record exists. Stored channels that are no longer configured
    /// are dropped from the store.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read; a corrupt store is fatal at startup.
    pub fn restore(&self) -> Result<(), SchedulerError> {
        if let Some(store) = &self.store {
            for record in store.load_channels()? {
                if !self.gates.contains_key(&record.name) {
                    info!(channel = %record.name, "Dropping bookkeeping of unconfigured channel");
                    store.delete_channel(&record.name)?;
                }
            }
        }
        for channel in self.gates.keys() {
            let record = match &self.store {
                Some(store) => store.get_channel(channel)?,
                None => None,
            };
            match record {
                Some(record) => {
                    info!(
                        channel = %channel,
                        last_good_sequence = ?record.last_good_sequence,
                        "Restored channel bookkeeping"
                    );
                    self.registry.restore(&record);
                }
                None => self.registry.register(channel, Revisions::new()),
            }
        }
        Ok(())
    }

    /// Refresh `channel` now, honouring its gate.
    ///
    /// If the gate admits this call it runs the refresh to completion, then
    /// runs the single queued refresh if triggers arrived meanwhile.
    pub async fn refresh_channel(&self, channel: &str) -> Result<RefreshReport, SchedulerError> {
        let gate = self
            .gates
            .get(channel)
            .ok_or_else(|| SchedulerError::UnknownChannel(channel.to_string()))?;

        let mut permit = match gate.try_acquire() {
            Admission::Run(permit) => permit,
            Admission::Queued => {
                debug!(channel, "Refresh in progress, queued one more run");
                return Ok(RefreshReport::Queued);
            }
            Admission::Coalesced => {
                debug!(channel, "Refresh already queued, trigger coalesced");
                return Ok(RefreshReport::Coalesced);
            }
            Admission::Skipped => {
                debug!(channel, "Refresh in progress, trigger skipped");
                return Ok(RefreshReport::Skipped);
            }
        };

        loop {
            let outcome = self.attempt(channel).await;
            self.finish(channel, &outcome).await;

            if self.shutdown.is_cancelled() {
                // dropping the permit discards a queued run
                return Ok(RefreshReport::Completed(outcome));
            }
            match permit.complete() {
                Some(next) => {
                    debug!(channel, "Running queued refresh");
                    permit = next;
                }
                None => return Ok(RefreshReport::Completed(outcome)),
            }
        }
    }

    /// Refresh `channel` in the background.
    pub fn trigger(self: &Arc<Self>, channel: &str) -> Result<(), SchedulerError> {
        if !self.gates.contains_key(channel) {
            return Err(SchedulerError::UnknownChannel(channel.to_string()));
        }
        let worker = Arc::clone(self);
        let channel = channel.to_string();
        self.tracker.spawn(async move {
            if let Err(e) = worker.refresh_channel(&channel).await {
                warn!(channel = %channel, error = %e, "Triggered refresh failed");
            }
        });
        Ok(())
    }

    /// Refresh every channel concurrently and wait for all of them.
    pub async fn refresh_all(&self) -> Vec<(String, RefreshReport)> {
        let runs = self.gates.keys().map(|channel| async move {
            let report = self.refresh_channel(channel).await;
            (channel.clone(), report)
        });

        join_all(runs)
            .await
            .into_iter()
            .filter_map(|(channel, report)| match report {
                Ok(report) => Some((channel, report)),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Refresh failed");
                    None
                }
            })
            .collect()
    }

    /// One bounded refresh attempt. Never fails; failures become outcomes.
    #[tracing::instrument(skip(self), fields(sequence = tracing::field::Empty))]
    async fn attempt(&self, channel: &str) -> RefreshOutcome {
        let start = Instant::now();
        if let Some(sequence) = self.unchanged_upstream(channel).await {
            info!(visible = sequence, "Already up to date");
            return RefreshOutcome::UpToDate { sequence };
        }

        let sequence = match self.registry.next_sequence(channel) {
            Ok(sequence) => sequence,
            Err(e) => {
                return RefreshOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        tracing::Span::current().record("sequence", sequence);

        let built = tokio::select! {
            _ = self.shutdown.cancelled() => Err(RefreshError::Cancelled),
            result = tokio::time::timeout(self.refresh_timeout, self.build(channel, sequence)) => {
                result.unwrap_or(Err(RefreshError::RefreshTimeout(self.refresh_timeout)))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let index = match built {
            Ok(index) => index,
            Err(RefreshError::RefreshTimeout(after)) => {
                warn!(duration_ms, "Refresh timed out, keeping previous snapshot");
                return RefreshOutcome::TimedOut {
                    after_secs: after.as_secs(),
                };
            }
            Err(e) => {
                warn!(duration_ms, error = %e, "Refresh failed, keeping previous snapshot");
                return RefreshOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let records = index.len();
        let skipped = index.skipped();
        let counts = index.kind_counts();
        let packages = counts.get(&RecordKind::Package).copied().unwrap_or(0);
        let options = counts.get(&RecordKind::Option).copied().unwrap_or(0);
        match self.registry.publish(Arc::new(index)) {
            Ok(_) => {
                info!(packages, options, skipped, duration_ms, "Refresh complete");
                RefreshOutcome::Success {
                    sequence,
                    records,
                    skipped,
                }
            }
            Err(RegistryError::Stale { visible, .. }) => {
                info!(visible, "Refresh superseded by a newer build");
                RefreshOutcome::Superseded { sequence, visible }
            }
            Err(e) => RefreshOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Sequence of the visible snapshot if the source reports the same input
    /// revisions it was built from. Lookup failures only cost the shortcut.
    async fn unchanged_upstream(&self, channel: &str) -> Option<u64> {
        let current = self.registry.get(channel)?;
        if current.revisions().is_empty() {
            return None;
        }
        let lookup = tokio::select! {
            _ = self.shutdown.cancelled() => return None,
            result = tokio::time::timeout(self.refresh_timeout, self.source.latest_revisions(channel)) => result,
        };
        match lookup {
            Ok(Ok(Some(latest))) if latest == *current.revisions() => Some(current.sequence()),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(error = %e, "Revision lookup failed, refreshing");
                None
            }
            Err(_) => {
                debug!("Revision lookup timed out, refreshing");
                None
            }
        }
    }

    /// Fetch the feed, then parse and index it on the blocking pool.
    async fn build(&self, channel: &str, sequence: u64) -> Result<ChannelIndex, RefreshError> {
        let raw = self.source.fetch(channel).await?;
        debug!(
            options_bytes = raw.options.len(),
            packages_bytes = raw.packages.len(),
            "Fetched feed"
        );

        let name = channel.to_string();
        let built = tokio::task::spawn_blocking(move || -> Result<ChannelIndex, FeedError> {
            let load = load_feed(&raw)?;
            Ok(ChannelIndex::build(name, sequence, load))
        })
        .await
        .map_err(|e| RefreshError::Build(e.to_string()))??;
        Ok(built)
    }

    /// Record `outcome` in the registry and, if configured, the store.
    async fn finish(&self, channel: &str, outcome: &RefreshOutcome) {
        let at = Utc::now();
        if let Err(e) = self.registry.record_outcome(channel, outcome.clone(), at) {
            warn!(channel, error = %e, "Failed to record refresh outcome");
            return;
        }

        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(record) = self.registry.channel_record(channel) else {
            return;
        };
        let entry = RefreshLogEntry {
            channel: channel.to_string(),
            at,
            outcome: outcome.clone(),
        };
        let persisted =
            tokio::task::spawn_blocking(move || store.record_refresh(&record, &entry)).await;
        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(channel, error = %e, "Failed to persist refresh outcome"),
            Err(e) => warn!(channel, error = %e, "Persist task failed"),
        }
    }
}
