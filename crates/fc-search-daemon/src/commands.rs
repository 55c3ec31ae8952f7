//! Command implementations for the fc-search daemon.
//!
//! Handles:
//! - serve: restore bookkeeping, start the refresh scheduler, answer requests
//! - search: one-shot load and query of a single channel
//! - channels: print persisted bookkeeping
//! - refresh: one-shot refresh that records its outcome

use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};

use fc_search_feed::{CommandFeedSource, DirectoryFeedSource, FeedSource};
use fc_search_index::{ChannelRegistry, Page, QueryEngine, SearchOptions};
use fc_search_scheduler::{RefreshReport, RefreshService, RefreshWorker, SchedulerConfig};
use fc_search_storage::{RefreshLogEntry, Storage};
use fc_search_types::{ChannelRecord, RefreshOutcome, Settings};

use crate::protocol::Handler;

/// CLI overrides applied on top of the layered configuration.
#[derive(Debug, Default, Clone)]
pub struct Overrides<'a> {
    pub config_path: Option<&'a str>,
    pub log_level: Option<&'a str>,
    pub feed_dir: Option<&'a str>,
    pub state_dir: Option<&'a str>,
}

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(overrides: &Overrides<'_>) -> Result<Settings> {
    let mut settings =
        Settings::load(overrides.config_path).context("Failed to load configuration")?;

    if let Some(log_level) = overrides.log_level {
        settings.log_level = log_level.to_string();
    }
    if let Some(feed_dir) = overrides.feed_dir {
        settings.feed_dir = feed_dir.to_string();
    }
    if let Some(state_dir) = overrides.state_dir {
        settings.state_dir = state_dir.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
///
/// Logs go to stderr; stdout carries command output and protocol responses.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Feed source selected by the settings: the producer command if one is
/// configured, the feed directory otherwise.
pub fn feed_source(settings: &Settings) -> Arc<dyn FeedSource> {
    match CommandFeedSource::from_argv(&settings.feed_command) {
        Some(command) => Arc::new(command.with_revision_command(&settings.revision_command)),
        None => Arc::new(DirectoryFeedSource::new(settings.expanded_feed_dir())),
    }
}

/// Open (creating if needed) the bookkeeping store.
pub fn open_store(settings: &Settings) -> Result<Arc<Storage>> {
    let path = settings.store_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let storage = Storage::open(&path)
        .with_context(|| format!("Failed to open bookkeeping store at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn build_worker(
    settings: &Settings,
    registry: Arc<ChannelRegistry>,
    store: Option<Arc<Storage>>,
) -> Result<RefreshWorker> {
    let config = SchedulerConfig::from(&settings.refresh);
    let mut worker = RefreshWorker::new(registry, feed_source(settings), &settings.channels, &config);
    if let Some(store) = store {
        worker = worker.with_store(store);
    }
    worker
        .restore()
        .context("Failed to restore channel bookkeeping")?;
    Ok(worker)
}

/// Run the daemon until stdin closes or a shutdown signal arrives.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the bookkeeping store and restore channel state
/// 3. Start the refresh scheduler (initial refresh of all channels)
/// 4. Answer JSON requests on stdin, one response line each on stdout
/// 5. Shut down gracefully on EOF, SIGINT or SIGTERM
pub async fn serve(settings: Settings, initial_refresh: bool) -> Result<()> {
    info!("fc-search starting...");
    info!("Configuration:");
    info!("  Channels: {}", settings.channels.join(", "));
    info!("  State directory: {}", settings.state_dir);
    info!("  Refresh schedule: {} ({})", settings.refresh.cron, settings.refresh.timezone);

    if settings.channels.is_empty() {
        warn!("No channels configured; every search will report an unknown channel");
    }

    let store = open_store(&settings)?;
    let registry = Arc::new(ChannelRegistry::new());
    let worker = Arc::new(build_worker(&settings, Arc::clone(&registry), Some(Arc::clone(&store)))?);
    info!(source = %feed_source(&settings).describe(), "Feed source");

    let mut config = SchedulerConfig::from(&settings.refresh);
    config.refresh_on_start = initial_refresh && config.refresh_on_start;
    let mut service = RefreshService::new(config, Arc::clone(&worker))
        .await
        .context("Failed to create refresh scheduler")?;
    service
        .start()
        .await
        .context("Failed to start refresh scheduler")?;

    let engine = QueryEngine::new(registry)
        .with_page_sizes(settings.page_size, settings.max_page_size);
    let handler = Handler::new(engine, worker);

    let requests = handler.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    tokio::select! {
        result = requests => {
            result.context("Request stream failed")?;
            info!("Input closed, shutting down...");
        }
        _ = shutdown_signal() => {}
    }

    service
        .shutdown()
        .await
        .context("Failed to stop refresh scheduler")?;
    if let Err(e) = store.flush() {
        warn!("Failed to flush bookkeeping store: {}", e);
    }
    info!("fc-search stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Build `channel` from its feed and run one query against it.
///
/// Nothing is persisted.
pub async fn search(
    settings: &Settings,
    channel: &str,
    query: &str,
    options: SearchOptions,
) -> Result<Page> {
    let registry = Arc::new(ChannelRegistry::new());
    let worker = build_worker(settings, Arc::clone(&registry), None)?;

    if settings.channels.iter().any(|c| c == channel) {
        if let RefreshReport::Completed(outcome) = worker.refresh_channel(channel).await? {
            if let RefreshOutcome::Failed { reason } = &outcome {
                warn!(channel, reason = %reason, "Could not load channel");
            }
        }
    }

    let engine = QueryEngine::new(registry)
        .with_page_sizes(settings.page_size, settings.max_page_size);
    Ok(engine.search_with(channel, query, options)?)
}

/// Render a page for terminal output.
pub fn format_page(page: &Page) -> String {
    let mut out = String::new();
    for hit in &page.hits {
        let record = &hit.record;
        out.push_str(&format!("{:<8} {}", record.kind().as_str(), record.identity()));
        if let Some(package) = record.as_package() {
            if !package.version.is_empty() {
                out.push_str(&format!(" ({})", package.version));
            }
        }
        if let Some(description) = record.description() {
            let line = description.lines().next().unwrap_or_default().trim();
            if !line.is_empty() {
                out.push_str(&format!("\n         {}", line));
            }
        }
        out.push('\n');
    }

    let first = page.page.saturating_mul(page.page_size);
    let shown = if page.hits.is_empty() {
        "no results".to_string()
    } else {
        format!(
            "{}-{} of {}",
            first.saturating_add(1),
            first.saturating_add(page.hits.len()),
            page.total
        )
    };
    match page.sequence() {
        Some(sequence) => out.push_str(&format!(
            "{} in {} (build {})\n",
            shown, page.channel, sequence
        )),
        None => out.push_str(&format!("{} in {}\n", shown, page.channel)),
    }
    out
}

/// Persisted bookkeeping of every configured channel, plus any channel the
/// store still remembers.
pub fn channel_records(settings: &Settings, store: &Storage) -> Result<Vec<ChannelRecord>> {
    let mut records = store
        .load_channels()
        .context("Failed to read channel bookkeeping")?;
    for channel in &settings.channels {
        if !records.iter().any(|r| &r.name == channel) {
            records.push(ChannelRecord::new(channel.clone()));
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// Render channel bookkeeping for terminal output.
pub fn format_channels(records: &[ChannelRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let sequence = record
            .last_good_sequence
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        let refreshed = record
            .last_refresh
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        let outcome = record
            .last_outcome
            .as_ref()
            .map_or_else(|| "-".to_string(), describe_outcome);
        out.push_str(&format!(
            "{:<28} build {:<6} refreshed {:<26} {}\n",
            record.name, sequence, refreshed, outcome
        ));
    }
    out
}

/// Render the newest refresh log entries of one channel, indented below
/// its [`format_channels`] line.
pub fn format_history(entries: &[RefreshLogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "    {:<26} {}\n",
            entry.at.to_rfc3339(),
            describe_outcome(&entry.outcome)
        ));
    }
    out
}

fn describe_outcome(outcome: &RefreshOutcome) -> String {
    match outcome {
        RefreshOutcome::Success { records, skipped, .. } => {
            format!("ok ({} records, {} skipped)", records, skipped)
        }
        RefreshOutcome::Failed { reason } => format!("failed: {}", reason),
        RefreshOutcome::TimedOut { after_secs } => format!("timed out after {}s", after_secs),
        RefreshOutcome::Superseded { visible, .. } => format!("superseded by build {}", visible),
        RefreshOutcome::UpToDate { sequence } => format!("up to date (build {})", sequence),
    }
}

/// Refresh `channel` once and persist the outcome.
///
/// # Errors
///
/// Fails for unconfigured channels and for failed refreshes.
pub async fn refresh(settings: &Settings, channel: &str) -> Result<RefreshOutcome> {
    let store = open_store(settings)?;
    let registry = Arc::new(ChannelRegistry::new());
    let worker = build_worker(settings, registry, Some(Arc::clone(&store)))?;

    let report = worker
        .refresh_channel(channel)
        .await
        .with_context(|| format!("Cannot refresh `{}`", channel))?;
    store.flush().context("Failed to flush bookkeeping store")?;

    match report {
        RefreshReport::Completed(outcome) if outcome.is_failure() => {
            bail!("Refresh of `{}` failed: {:?}", channel, outcome)
        }
        RefreshReport::Completed(outcome) => Ok(outcome),
        other => bail!("Refresh of `{}` did not run: {:?}", channel, other),
    }
}
