//! Feed error types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which of the two feed documents an error or skip refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Document {
    Options,
    Packages,
}

impl Document {
    pub fn file_name(&self) -> &'static str {
        match self {
            Document::Options => "options.json",
            Document::Packages => "packages.json",
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Errors that abort a whole feed load.
///
/// Per-entry problems are not errors; see [`crate::SkipReason`].
#[derive(Debug, Error)]
pub enum FeedError {
    /// The document is not well-formed JSON, or its top level is neither an
    /// object nor an array.
    #[error("Feed document {document} is unparsable: {reason}")]
    Unparsable { document: Document, reason: String },

    /// The feed could not be obtained from its source
    #[error("Failed to fetch feed for channel `{channel}`: {reason}")]
    Fetch { channel: String, reason: String },

    /// IO error while reading a feed file
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
