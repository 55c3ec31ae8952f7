//! fc-search
//!
//! Package and NixOS option search across release channels.
//!
//! # Usage
//!
//! ```bash
//! fc-search serve [--no-initial-refresh]
//! fc-search search <CHANNEL> <QUERY> [--kind package|option] [--limit N] [--page N] [--json]
//! fc-search channels [--json]
//! fc-search refresh <CHANNEL>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/fc-search/config.toml)
//! 3. `--config` file
//! 4. Environment variables (FCSEARCH_*)
//! 5. CLI flags

use anyhow::{Context, Result};
use clap::Parser;

use fc_search_daemon::{
    channel_records, format_channels, format_history, format_page, init_logging, load_settings,
    open_store, refresh, search, serve, Cli, Commands, Overrides,
};
use fc_search_index::SearchOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&Overrides {
        config_path: cli.config.as_deref(),
        log_level: cli.log_level.as_deref(),
        feed_dir: cli.feed_dir.as_deref(),
        state_dir: cli.state_dir.as_deref(),
    })?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Serve { no_initial_refresh } => {
            serve(settings, !no_initial_refresh).await?;
            // the stdin reader thread may still be blocked on a read
            std::process::exit(0);
        }
        Commands::Search {
            channel,
            query,
            kind,
            limit,
            page,
            json,
        } => {
            let options = SearchOptions { kind, limit, page };
            let page = search(&settings, &channel, &query, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                print!("{}", format_page(&page));
            }
        }
        Commands::Channels { json, history } => {
            let store = open_store(&settings)?;
            let records = channel_records(&settings, &store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    print!("{}", format_channels(std::slice::from_ref(record)));
                    if history > 0 {
                        let entries = store
                            .recent_refreshes(&record.name, history)
                            .with_context(|| {
                                format!("Failed to read refresh log of `{}`", record.name)
                            })?;
                        print!("{}", format_history(&entries));
                    }
                }
            }
        }
        Commands::Refresh { channel } => {
            let outcome = refresh(&settings, &channel).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
    }

    Ok(())
}
