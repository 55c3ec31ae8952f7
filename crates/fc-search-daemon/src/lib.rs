//! fc-search daemon library exports.
//!
//! This crate provides the `fc-search` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (serve, search, channels, refresh)
//! - `protocol`: Line-delimited JSON requests answered by `serve`

pub mod cli;
pub mod commands;
pub mod protocol;

pub use cli::{Cli, Commands};
pub use commands::{
    channel_records, feed_source, format_channels, format_history, format_page, init_logging,
    load_settings, open_store, refresh, search, serve, Overrides,
};
pub use protocol::{ErrorKind, Handler, Request, Response};
