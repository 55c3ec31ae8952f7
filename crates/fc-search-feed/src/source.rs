//! Feed sources.
//!
//! A [`FeedSource`] obtains the raw documents of one channel. Parsing and
//! validation happen later in [`crate::load_feed`], so a source only moves
//! bytes around.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use fc_search_types::Revisions;

use crate::error::{Document, FeedError};

/// Name of the optional revisions file next to the two feed documents.
pub const INPUTS_FILE: &str = "inputs.json";

/// Unparsed feed documents of one channel.
#[derive(Debug, Clone, Default)]
pub struct RawFeed {
    pub channel: String,
    pub options: Vec<u8>,
    pub packages: Vec<u8>,
    /// Upstream input revisions, empty when the producer did not report any.
    pub revisions: Revisions,
}

impl RawFeed {
    pub fn new(channel: impl Into<String>, options: impl Into<Vec<u8>>, packages: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            options: options.into(),
            packages: packages.into(),
            revisions: Revisions::new(),
        }
    }

    /// Attach an input revision.
    pub fn with_revision(mut self, input: impl Into<String>, revision: impl Into<String>) -> Self {
        self.revisions.insert(input.into(), revision.into());
        self
    }
}

/// Where a channel's feed documents come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the raw documents for `channel`.
    async fn fetch(&self, channel: &str) -> Result<RawFeed, FeedError>;

    /// Current upstream revisions of `channel`, if the source can tell them
    /// without fetching. `None` means unknown and forces a full refresh.
    async fn latest_revisions(&self, _channel: &str) -> Result<Option<Revisions>, FeedError> {
        Ok(None)
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Read `options.json`, `packages.json` and the optional `inputs.json` from
/// `dir`.
///
/// A missing or unreadable `inputs.json` only costs the revisions; it is
/// logged and otherwise ignored.
pub async fn read_feed_dir(channel: &str, dir: &Path) -> Result<RawFeed, FeedError> {
    let options = read_file(&dir.join(Document::Options.file_name())).await?;
    let packages = read_file(&dir.join(Document::Packages.file_name())).await?;

    let revisions = read_inputs(channel, dir).await.unwrap_or_default();

    debug!(
        channel,
        dir = %dir.display(),
        options_bytes = options.len(),
        packages_bytes = packages.len(),
        "Read feed directory"
    );

    Ok(RawFeed {
        channel: channel.to_string(),
        options,
        packages,
        revisions,
    })
}

/// Revisions from `dir/inputs.json`; `None` if the file is missing,
/// unreadable or empty.
async fn read_inputs(channel: &str, dir: &Path) -> Option<Revisions> {
    let inputs_path = dir.join(INPUTS_FILE);
    let bytes = match tokio::fs::read(&inputs_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(channel, path = %inputs_path.display(), error = %e, "Ignoring unreadable inputs file");
            return None;
        }
    };
    match serde_json::from_slice::<Revisions>(&bytes) {
        Ok(revisions) if revisions.is_empty() => None,
        Ok(revisions) => Some(revisions),
        Err(e) => {
            warn!(channel, path = %inputs_path.display(), error = %e, "Ignoring unreadable inputs file");
            None
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, FeedError> {
    tokio::fs::read(path).await.map_err(|source| FeedError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads feeds from `<root>/<channel>/`.
#[derive(Debug, Clone)]
pub struct DirectoryFeedSource {
    root: PathBuf,
}

impl DirectoryFeedSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel)
    }
}

#[async_trait]
impl FeedSource for DirectoryFeedSource {
    async fn fetch(&self, channel: &str) -> Result<RawFeed, FeedError> {
        read_feed_dir(channel, &self.channel_dir(channel)).await
    }

    async fn latest_revisions(&self, channel: &str) -> Result<Option<Revisions>, FeedError> {
        Ok(read_inputs(channel, &self.channel_dir(channel)).await)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

/// A program plus arguments, with `{channel}` placeholders.
#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn args_for(&self, channel: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{channel}", channel))
            .collect()
    }

    /// Run for `channel` and return its stdout; a non-zero exit is a fetch
    /// failure carrying stderr.
    async fn run(&self, channel: &str) -> Result<String, FeedError> {
        let args = self.args_for(channel);
        debug!(channel, program = %self.program, ?args, "Running feed command");

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FeedError::Fetch {
                channel: channel.to_string(),
                reason: format!("failed to run `{}`: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FeedError::Fetch {
                channel: channel.to_string(),
                reason: format!("`{}` exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs an external producer per fetch.
///
/// Every `{channel}` in the arguments is replaced by the channel name. The
/// producer must print the directory holding the feed documents as the last
/// non-empty line of its stdout.
///
/// An optional revision command prints the channel's current input
/// revisions as a JSON object, so unchanged channels skip the producer.
#[derive(Debug, Clone)]
pub struct CommandFeedSource {
    producer: Invocation,
    revisions: Option<Invocation>,
}

impl CommandFeedSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            producer: Invocation {
                program: program.into(),
                args,
            },
            revisions: None,
        }
    }

    /// Build from a `[program, args...]` list as found in the settings.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        Invocation::from_argv(argv).map(|producer| Self {
            producer,
            revisions: None,
        })
    }

    /// Use `argv` to look up current revisions. An empty list disables the
    /// lookup.
    pub fn with_revision_command(mut self, argv: &[String]) -> Self {
        self.revisions = Invocation::from_argv(argv);
        self
    }
}

#[async_trait]
impl FeedSource for CommandFeedSource {
    async fn fetch(&self, channel: &str) -> Result<RawFeed, FeedError> {
        let program = &self.producer.program;
        let stdout = self.producer.run(channel).await?;
        let dir = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| FeedError::Fetch {
                channel: channel.to_string(),
                reason: format!("`{}` printed no output directory", program),
            })?;

        read_feed_dir(channel, Path::new(dir)).await
    }

    async fn latest_revisions(&self, channel: &str) -> Result<Option<Revisions>, FeedError> {
        let Some(command) = &self.revisions else {
            return Ok(None);
        };
        let stdout = command.run(channel).await?;
        let revisions: Revisions =
            serde_json::from_str(stdout.trim()).map_err(|e| FeedError::Fetch {
                channel: channel.to_string(),
                reason: format!("`{}` printed no revisions object: {e}", command.program),
            })?;
        Ok(Some(revisions).filter(|r| !r.is_empty()))
    }

    fn describe(&self) -> String {
        format!("command {}", self.producer.program)
    }
}

/// In-memory feeds, replaceable at runtime.
#[derive(Debug, Default)]
pub struct MemoryFeedSource {
    feeds: RwLock<HashMap<String, RawFeed>>,
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the feed for `raw.channel`.
    pub fn set(&self, raw: RawFeed) {
        let mut feeds = self.feeds.write().unwrap_or_else(|e| e.into_inner());
        feeds.insert(raw.channel.clone(), raw);
    }

    pub fn remove(&self, channel: &str) -> Option<RawFeed> {
        let mut feeds = self.feeds.write().unwrap_or_else(|e| e.into_inner());
        feeds.remove(channel)
    }
}

#[async_trait]
impl FeedSource for MemoryFeedSource {
    async fn fetch(&self, channel: &str) -> Result<RawFeed, FeedError> {
        let feeds = self.feeds.read().unwrap_or_else(|e| e.into_inner());
        feeds.get(channel).cloned().ok_or_else(|| FeedError::Fetch {
            channel: channel.to_string(),
            reason: "no feed available".to_string(),
        })
    }

    async fn latest_revisions(&self, channel: &str) -> Result<Option<Revisions>, FeedError> {
        let feeds = self.feeds.read().unwrap_or_else(|e| e.into_inner());
        Ok(feeds
            .get(channel)
            .map(|raw| raw.revisions.clone())
            .filter(|r| !r.is_empty()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
