//! Registry and query error types.

use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The channel was never registered
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// A snapshot with an equal or higher sequence is already visible
    #[error("Stale build for channel `{channel}`: sequence {sequence} <= visible {visible}")]
    Stale {
        channel: String,
        sequence: u64,
        visible: u64,
    },
}

/// Errors returned to query callers.
///
/// Both variants are answers, not faults: callers render them as an empty
/// result with a reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Known channel without a successful build yet
    #[error("Channel `{0}` is not ready yet")]
    ChannelNotReady(String),
}
