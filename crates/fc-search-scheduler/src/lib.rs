//! Background channel refresh for fc-search.
//!
//! This crate keeps every configured channel's index fresh using
//! `tokio-cron-scheduler`, with timezone support, jitter, bounded attempts
//! and graceful shutdown.
//!
//! # Features
//!
//! - Cron-based refresh per channel, evaluated in a chrono-tz timezone
//! - Per-channel refresh gate: one run at a time, one queued run, further
//!   triggers coalesce
//! - Refresh timeout; an abandoned attempt never publishes
//! - Outcomes recorded in the registry and the bookkeeping store
//! - Shutdown via CancellationToken with a bounded wait for in-flight runs
//!
//! # Example
//!
//! ```ignore
//! use fc_search_scheduler::{RefreshService, RefreshWorker, SchedulerConfig};
//!
//! let config = SchedulerConfig::from(&settings.refresh);
//! let worker = RefreshWorker::new(registry, source, &settings.channels, &config)
//!     .with_store(store);
//! worker.restore()?;
//!
//! let mut service = RefreshService::new(config, Arc::new(worker)).await?;
//! service.start().await?;
//! // ...
//! service.shutdown().await?;
//! ```

mod config;
mod error;
pub mod gate;
mod jitter;
mod service;
mod worker;

pub use config::SchedulerConfig;
pub use error::{RefreshError, SchedulerError};
pub use gate::{Admission, OverlapPolicy, RefreshGate, RefreshPermit};
pub use jitter::{with_jitter, JitterConfig};
pub use service::{validate_cron_expression, RefreshService};
pub use worker::{RefreshReport, RefreshWorker};
