//! Scheduler configuration.

use std::time::Duration;

use fc_search_types::RefreshSettings;

use crate::gate::OverlapPolicy;
use crate::jitter::JitterConfig;
use crate::SchedulerError;

/// Configuration for the refresh service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// 6-field cron expression shared by all channel jobs.
    pub cron: String,
    /// IANA timezone the cron expression is evaluated in.
    pub timezone: String,
    /// Random delay before scheduled (not explicit) refreshes.
    pub jitter: JitterConfig,
    /// Bound for one refresh attempt.
    pub refresh_timeout: Duration,
    /// How long shutdown waits for in-flight refreshes.
    pub shutdown_timeout: Duration,
    /// Trigger every channel once when the service starts.
    pub refresh_on_start: bool,
    /// What a trigger does while the channel is refreshing.
    pub overlap: OverlapPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&RefreshSettings::default())
    }
}

impl From<&RefreshSettings> for SchedulerConfig {
    fn from(settings: &RefreshSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            timezone: settings.timezone.clone(),
            jitter: JitterConfig::new(settings.jitter_secs),
            refresh_timeout: Duration::from_secs(settings.timeout_secs),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            refresh_on_start: settings.on_startup,
            overlap: if settings.skip_overlapping {
                OverlapPolicy::Skip
            } else {
                OverlapPolicy::Queue
            },
        }
    }
}

impl SchedulerConfig {
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }
}
