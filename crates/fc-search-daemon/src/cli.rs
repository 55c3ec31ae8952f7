//! CLI argument parsing for the fc-search daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

use fc_search_types::RecordKind;

/// fc-search
///
/// Package and NixOS option search across release channels.
#[derive(Parser, Debug)]
#[command(name = "fc-search")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/fc-search/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the feed directory
    #[arg(long, global = true)]
    pub feed_dir: Option<String>,

    /// Override the state directory holding the bookkeeping store
    #[arg(long, global = true)]
    pub state_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refresh all channels on a schedule and answer JSON requests on stdin
    Serve {
        /// Skip the refresh of all channels at startup
        #[arg(long)]
        no_initial_refresh: bool,
    },

    /// Load one channel and run a single query against it
    Search {
        /// Channel to search
        channel: String,

        /// Query text
        query: String,

        /// Restrict results to packages or options
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<RecordKind>,

        /// Results per page
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Zero-based page number
        #[arg(short, long, default_value = "0")]
        page: usize,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show persisted channel bookkeeping
    Channels {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Also list the last N refresh outcomes of each channel
        #[arg(long, value_name = "N", default_value_t = 0)]
        history: usize,
    },

    /// Refresh one channel now and record the outcome
    Refresh {
        /// Channel to refresh
        channel: String,
    },
}

fn parse_kind(s: &str) -> Result<RecordKind, String> {
    s.parse()
}
