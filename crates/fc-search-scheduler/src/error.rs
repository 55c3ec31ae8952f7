//! Error types for the scheduler crate.

use std::time::Duration;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use fc_search_feed::FeedError;
use fc_search_storage::StorageError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Channel is not configured for refreshing
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Bookkeeping store failed while restoring channel state
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Scheduler is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

/// Why a single refresh attempt produced no new snapshot.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The attempt exceeded its time budget and was abandoned
    #[error("Refresh timed out after {}s", .0.as_secs())]
    RefreshTimeout(Duration),

    /// The blocking build task failed
    #[error("Index build failed: {0}")]
    Build(String),

    #[error("Refresh cancelled by shutdown")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InvalidCron("bad expression".to_string());
        assert!(err.to_string().contains("Invalid cron expression"));

        let err = SchedulerError::UnknownChannel("fc-99.99-dev".to_string());
        assert!(err.to_string().contains("fc-99.99-dev"));

        let err = SchedulerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = RefreshError::RefreshTimeout(Duration::from_secs(1800));
        assert_eq!(err.to_string(), "Refresh timed out after 1800s");

        let err = RefreshError::Feed(FeedError::Fetch {
            channel: "dev".to_string(),
            reason: "exit status 1".to_string(),
        });
        assert!(err.to_string().contains("exit status 1"));
    }
}
