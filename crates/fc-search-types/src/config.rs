//! Configuration loading for fc-search.
//!
//! Layered config: defaults -> default config file -> `--config` file ->
//! `FCSEARCH_*` environment variables. CLI flags are applied by the caller.
//!
//! The default config file lives at `~/.config/fc-search/config.toml` (or the
//! platform equivalent reported by `directories`).

use std::collections::HashSet;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Refresh scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// 6-field cron expression (sec min hour day month weekday).
    #[serde(default = "default_refresh_cron")]
    pub cron: String,

    /// IANA timezone the cron expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Upper bound of the random delay before a scheduled refresh.
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// A refresh running longer than this is abandoned.
    #[serde(default = "default_refresh_timeout")]
    pub timeout_secs: u64,

    /// Grace period for in-flight refreshes on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Refresh every channel once right after startup.
    #[serde(default = "default_true")]
    pub on_startup: bool,

    /// Drop triggers that arrive while the channel is refreshing instead of
    /// queueing one more run.
    #[serde(default)]
    pub skip_overlapping: bool,
}

fn default_refresh_cron() -> String {
    // every five hours, on the hour
    "0 0 */5 * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_jitter_secs() -> u64 {
    30
}

fn default_refresh_timeout() -> u64 {
    30 * 60
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            cron: default_refresh_cron(),
            timezone: default_timezone(),
            jitter_secs: default_jitter_secs(),
            timeout_secs: default_refresh_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            on_startup: true,
            skip_overlapping: false,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the bookkeeping store
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Root of the per-channel feed directories (`<feed_dir>/<channel>/*.json`)
    #[serde(default = "default_feed_dir")]
    pub feed_dir: String,

    /// Optional producer command; when set it replaces `feed_dir` lookups.
    /// `{channel}` in any argument is replaced by the channel name.
    #[serde(default)]
    pub feed_command: Vec<String>,

    /// Optional command printing a channel's current input revisions as a
    /// JSON object. Used with `feed_command` to skip rebuilds when nothing
    /// changed upstream. `{channel}` is substituted as in `feed_command`.
    #[serde(default)]
    pub revision_command: Vec<String>,

    /// Channels to serve
    #[serde(default)]
    pub channels: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Results per page when the caller does not ask for a size
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound for caller-requested page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default)]
    pub refresh: RefreshSettings,
}

fn default_state_dir() -> String {
    ProjectDirs::from("", "", "fc-search")
        .map(|p| p.data_local_dir().join("state"))
        .unwrap_or_else(|| PathBuf::from("./state"))
        .to_string_lossy()
        .to_string()
}

fn default_feed_dir() -> String {
    "./feeds".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    200
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            feed_dir: default_feed_dir(),
            feed_command: Vec::new(),
            revision_command: Vec::new(),
            channels: Vec::new(),
            log_level: default_log_level(),
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            refresh: RefreshSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/fc-search/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (FCSEARCH_*, nested keys joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "fc-search")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("state_dir", default_state_dir())?
            .set_default("feed_dir", default_feed_dir())?
            .set_default("log_level", default_log_level())?
            .set_default("page_size", default_page_size() as i64)?
            .set_default("max_page_size", default_max_page_size() as i64)?
            .set_default("refresh.cron", default_refresh_cron())?
            .set_default("refresh.timezone", default_timezone())?
            .set_default("refresh.jitter_secs", default_jitter_secs() as i64)?
            .set_default("refresh.timeout_secs", default_refresh_timeout() as i64)?
            .set_default(
                "refresh.shutdown_timeout_secs",
                default_shutdown_timeout() as i64,
            )?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // FCSEARCH_PAGE_SIZE, FCSEARCH_REFRESH__CRON, FCSEARCH_CHANNELS=a,b
        builder = builder.add_source(
            Environment::with_prefix("FCSEARCH")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("channels")
                .with_list_parse_key("feed_command")
                .with_list_parse_key("revision_command")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_page_size < self.page_size {
            return Err(ConfigError::Invalid {
                key: "max_page_size",
                reason: format!(
                    "must be >= page_size ({}), got {}",
                    self.page_size, self.max_page_size
                ),
            });
        }
        if self.refresh.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "refresh.timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "channels",
                    reason: "channel names must not be empty".to_string(),
                });
            }
            // ':' separates the fields of storage keys
            if channel.contains(':') {
                return Err(ConfigError::Invalid {
                    key: "channels",
                    reason: format!("channel `{channel}` must not contain ':'"),
                });
            }
            if !seen.insert(channel.as_str()) {
                return Err(ConfigError::Invalid {
                    key: "channels",
                    reason: format!("duplicate channel `{channel}`"),
                });
            }
        }
        Ok(())
    }

    /// State directory with `~` expanded.
    pub fn expanded_state_dir(&self) -> PathBuf {
        expand(&self.state_dir)
    }

    /// Feed directory with `~` expanded.
    pub fn expanded_feed_dir(&self) -> PathBuf {
        expand(&self.feed_dir)
    }

    /// Location of the RocksDB bookkeeping store inside the state directory.
    pub fn store_path(&self) -> PathBuf {
        self.expanded_state_dir().join("registry")
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.max_page_size, 200);
        assert_eq!(settings.refresh.cron, "0 0 */5 * * *");
        assert_eq!(settings.refresh.timezone, "UTC");
        assert!(settings.channels.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
feed_dir = "/srv/feeds"
channels = ["fc-24.11-production", "fc-24.11-dev"]
page_size = 20

[refresh]
cron = "0 */10 * * * *"
timeout_secs = 60
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&file.path().to_string_lossy())).unwrap();
        assert_eq!(settings.feed_dir, "/srv/feeds");
        assert_eq!(settings.channels.len(), 2);
        assert_eq!(settings.page_size, 20);
        assert_eq!(settings.refresh.cron, "0 */10 * * * *");
        assert_eq!(settings.refresh.timeout_secs, 60);
        // untouched nested defaults survive
        assert_eq!(settings.refresh.jitter_secs, 30);
        assert!(settings.refresh.on_startup);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let result = Settings::load(Some("/nonexistent/fc-search/config.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validate_rejects_bad_page_sizes() {
        let settings = Settings {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "page_size", .. })
        ));

        let settings = Settings {
            page_size: 100,
            max_page_size: 10,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                key: "max_page_size",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_channels() {
        let settings = Settings {
            channels: vec!["a".to_string(), "a".to_string()],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colon_in_channel() {
        let settings = Settings {
            channels: vec!["a".to_string(), "a:b".to_string()],
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "channels", .. }));
        assert!(err.to_string().contains("a:b"));
    }

    #[test]
    fn test_store_path_inside_state_dir() {
        let settings = Settings {
            state_dir: "/var/lib/fc-search".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.store_path(),
            PathBuf::from("/var/lib/fc-search/registry")
        );
    }

    #[test]
    fn test_tilde_expansion() {
        let settings = Settings {
            feed_dir: "~/feeds".to_string(),
            ..Default::default()
        };
        let expanded = settings.expanded_feed_dir();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("feeds"));
    }
}
