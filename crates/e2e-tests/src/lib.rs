//! End-to-end test infrastructure for fc-search.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full feed-to-query pipeline: feed directories on disk,
//! refresh, registry publication, bookkeeping and search.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use fc_search_feed::DirectoryFeedSource;
use fc_search_index::{ChannelRegistry, QueryEngine};
use fc_search_scheduler::{JitterConfig, RefreshWorker, SchedulerConfig};
use fc_search_storage::Storage;

/// Shared test harness for E2E tests.
///
/// Owns a temp directory with a feed root and a bookkeeping store, and a
/// worker refreshing the configured channels from that feed root.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Root of the per-channel feed directories
    pub feed_dir: PathBuf,
    pub storage: Arc<Storage>,
    pub registry: Arc<ChannelRegistry>,
    pub worker: Arc<RefreshWorker>,
    pub engine: QueryEngine,
}

impl TestHarness {
    /// Create a harness serving `channels`. No channel is built yet.
    pub fn new(channels: &[&str]) -> Self {
        Self::with_config(channels, test_config())
    }

    pub fn with_config(channels: &[&str], config: SchedulerConfig) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let feed_dir = temp_dir.path().join("feeds");
        std::fs::create_dir_all(&feed_dir).expect("Failed to create feed dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("state")).expect("Failed to open test storage"),
        );

        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let registry = Arc::new(ChannelRegistry::new());
        let worker = RefreshWorker::new(
            Arc::clone(&registry),
            Arc::new(DirectoryFeedSource::new(&feed_dir)),
            &channels,
            &config,
        )
        .with_store(Arc::clone(&storage));
        worker.restore().expect("Failed to restore bookkeeping");

        Self {
            _temp_dir: temp_dir,
            feed_dir,
            storage,
            engine: QueryEngine::new(Arc::clone(&registry)),
            registry,
            worker: Arc::new(worker),
        }
    }

    /// Write both feed documents of `channel`.
    pub fn write_feed(&self, channel: &str, options: &Value, packages: &Value) {
        write_feed(&self.feed_dir, channel, &options.to_string(), &packages.to_string());
    }

    /// Write raw document text, for malformed feeds.
    pub fn write_raw_feed(&self, channel: &str, options: &str, packages: &str) {
        write_feed(&self.feed_dir, channel, options, packages);
    }
}

/// Scheduler settings for tests: no jitter, short timeouts.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        jitter: JitterConfig::none(),
        refresh_timeout: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(2),
        refresh_on_start: false,
        ..SchedulerConfig::default()
    }
}

pub fn write_feed(feed_dir: &Path, channel: &str, options: &str, packages: &str) {
    let dir = feed_dir.join(channel);
    std::fs::create_dir_all(&dir).expect("Failed to create channel dir");
    std::fs::write(dir.join("options.json"), options).expect("Failed to write options.json");
    std::fs::write(dir.join("packages.json"), packages).expect("Failed to write packages.json");
}

/// A packages document keyed by attribute path, one entry per name.
pub fn packages(names: &[&str]) -> Value {
    let entries: Map<String, Value> = names
        .iter()
        .map(|name| {
            (
                name.to_string(),
                json!({
                    "name": name,
                    "version": "1.0",
                    "description": format!("The {name} package"),
                }),
            )
        })
        .collect();
    Value::Object(entries)
}

/// A packages document of `count` generated entries `pkg-0000`, `pkg-0001`, ...
pub fn generated_packages(count: usize) -> Value {
    let entries: Map<String, Value> = (0..count)
        .map(|i| {
            (
                format!("pkg-{i:04}"),
                json!({ "version": format!("{}.0", i % 7) }),
            )
        })
        .collect();
    Value::Object(entries)
}

/// An options document keyed by option path.
pub fn options(paths: &[&str]) -> Value {
    let entries: Map<String, Value> = paths
        .iter()
        .map(|path| {
            (
                path.to_string(),
                json!({
                    "type": "boolean",
                    "default": {"_type": "literalExpression", "text": "false"},
                    "description": format!("Whether to enable {path}."),
                    "declarations": ["nixos/modules/default.nix"],
                }),
            )
        })
        .collect();
    Value::Object(entries)
}
