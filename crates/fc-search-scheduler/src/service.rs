//! Refresh service: cron jobs around a [`RefreshWorker`].
//!
//! One timezone-aware job per channel, all sharing the configured cron
//! expression with independent jitter. Shutdown cancels in-flight refreshes
//! and waits for them up to the configured timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::jitter::with_jitter;
use crate::worker::RefreshWorker;
use crate::{SchedulerConfig, SchedulerError};

/// Validate a cron expression.
///
/// The expression uses the 6-field format:
/// second minute hour day-of-month month day-of-week.
///
/// # Errors
///
/// Returns `SchedulerError::InvalidCron` if the expression is not valid.
///
/// # Example
///
/// ```
/// use fc_search_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 */5 * * *").is_ok());
/// assert!(validate_cron_expression("0 30 4 * * *").is_ok());
///
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Scheduled refreshing of every configured channel.
pub struct RefreshService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    worker: Arc<RefreshWorker>,
    is_running: AtomicBool,
}

impl RefreshService {
    /// Create the service. Jobs are registered by `start()`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid timezone or cron expression.
    pub async fn new(config: SchedulerConfig, worker: Arc<RefreshWorker>) -> Result<Self, SchedulerError> {
        let _ = config.parse_timezone()?;
        validate_cron_expression(&config.cron)?;

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            worker,
            is_running: AtomicBool::new(false),
        })
    }

    pub fn worker(&self) -> &Arc<RefreshWorker> {
        &self.worker
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Register one job per channel and start the scheduler. With
    /// `refresh_on_start`, every channel is also refreshed right away in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the service is started.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let channels: Vec<String> = self.worker.channels().map(str::to_string).collect();
        for channel in &channels {
            self.add_channel_job(channel).await?;
        }

        self.scheduler.start().await?;
        info!(
            channels = channels.len(),
            cron = %self.config.cron,
            timezone = %self.config.timezone,
            "Refresh scheduler started"
        );

        if self.config.refresh_on_start {
            for channel in &channels {
                self.worker.trigger(channel)?;
            }
        }

        Ok(())
    }

    /// Cancel in-flight refreshes, wait for them up to the shutdown timeout,
    /// then stop the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the service is not started.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating refresh scheduler shutdown");
        self.worker.shutdown_token().cancel();

        let tracker = self.worker.tracker();
        tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = tracker.len(),
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Refreshes still running at shutdown timeout"
            );
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Refresh scheduler shutdown complete");
        Ok(())
    }

    async fn add_channel_job(&self, channel: &str) -> Result<uuid::Uuid, SchedulerError> {
        let tz: Tz = self.config.parse_timezone()?;
        let jitter = self.config.jitter;
        let worker = Arc::clone(&self.worker);
        let name = channel.to_string();

        let job = Job::new_async_tz(self.config.cron.as_str(), tz, move |_uuid, _lock| {
            let worker = Arc::clone(&worker);
            let name = name.clone();
            Box::pin(async move {
                let token = worker.shutdown_token();
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = with_jitter(jitter, async {
                        if let Err(e) = worker.trigger(&name) {
                            warn!(channel = %name, error = %e, "Scheduled refresh not started");
                        }
                    }) => {}
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(channel, uuid = %uuid, "Refresh job registered");
        Ok(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fc_search_feed::{MemoryFeedSource, RawFeed};
    use fc_search_index::ChannelRegistry;

    use crate::jitter::JitterConfig;

    fn worker(source: Arc<MemoryFeedSource>, config: &SchedulerConfig) -> Arc<RefreshWorker> {
        let registry = Arc::new(ChannelRegistry::new());
        let worker = RefreshWorker::new(registry, source, &["dev".to_string()], config);
        worker.restore().unwrap();
        Arc::new(worker)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            jitter: JitterConfig::none(),
            shutdown_timeout: Duration::from_secs(1),
            refresh_on_start: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 */5 * * *").is_ok());
        assert!(validate_cron_expression("*/10 * * * * *").is_ok());
        assert!(validate_cron_expression("0 0 0 * * SUN").is_ok());
        assert!(validate_cron_expression("invalid").is_err());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_configuration_rejected() {
        let bad_tz = SchedulerConfig {
            timezone: "Invalid/Zone".to_string(),
            ..config()
        };
        let result = RefreshService::new(bad_tz.clone(), worker(Arc::default(), &bad_tz)).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));

        let bad_cron = SchedulerConfig {
            cron: "every five hours".to_string(),
            ..config()
        };
        let result = RefreshService::new(bad_cron.clone(), worker(Arc::default(), &bad_cron)).await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_stop() {
        let config = config();
        let mut service = RefreshService::new(config.clone(), worker(Arc::default(), &config))
            .await
            .unwrap();
        assert!(!service.is_running());

        service.start().await.unwrap();
        assert!(service.is_running());
        assert!(matches!(
            service.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        service.shutdown().await.unwrap();
        assert!(!service.is_running());
        assert!(service.worker().shutdown_token().is_cancelled());
        assert!(matches!(
            service.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_refresh_on_start() {
        let source = Arc::new(MemoryFeedSource::new());
        source.set(RawFeed::new("dev", "{}", r#"{"nginx": {}}"#));
        let config = SchedulerConfig {
            refresh_on_start: true,
            ..config()
        };
        let worker = worker(source, &config);
        let service = RefreshService::new(config, Arc::clone(&worker)).await.unwrap();

        service.start().await.unwrap();
        // wait for the startup refresh without cancelling it
        worker.tracker().close();
        worker.tracker().wait().await;

        assert_eq!(worker.registry().get("dev").unwrap().sequence(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduled_job_refreshes() {
        let source = Arc::new(MemoryFeedSource::new());
        source.set(RawFeed::new("dev", "{}", r#"{"nginx": {}}"#));
        let config = SchedulerConfig {
            cron: "* * * * * *".to_string(),
            ..config()
        };
        let worker = worker(source, &config);
        let mut service = RefreshService::new(config, Arc::clone(&worker)).await.unwrap();

        service.start().await.unwrap();
        let mut published = false;
        for _ in 0..50 {
            if worker.registry().get("dev").is_some() {
                published = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        service.shutdown().await.unwrap();

        assert!(published, "cron job never refreshed the channel");
    }
}
