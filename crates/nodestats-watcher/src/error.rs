//! Watcher error types.

use nodestats_metrics::DefinitionError;

/// Errors that end a refresh cycle or prevent the pipeline from being built.
///
/// Per-entry problems (missing definitions, unparsable values, backpressure
/// drops) are never surfaced through this type; they are counted and logged.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Category or sub-resource resolution failed.
    #[error("key resolution failed for `{context}`: {reason}")]
    Resolution { context: String, reason: String },

    /// The consumer side of the output channel is gone.
    #[error("output channel closed")]
    ChannelClosed,

    /// No slot for the cycle marker freed up in time; the cycle did not start.
    #[error("output channel stayed full for {timeout_ms}ms")]
    ChannelSaturated { timeout_ms: u64 },

    /// A filter pattern could not be compiled.
    #[error("invalid filter pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The node client failed to answer.
    #[error("node client error: {0}")]
    Client(#[from] ClientError),

    #[error("metric definitions: {0}")]
    Definitions(#[from] DefinitionError),
}

/// Errors reported by a [`NodeClient`](crate::client::NodeClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("info request {keys:?} failed: {reason}")]
    Request { keys: Vec<String>, reason: String },

    #[error("node {0} unreachable")]
    Unreachable(String),

    #[error("failed to load captured responses: {0}")]
    Load(String),
}

/// Why a raw stat value could not be turned into a sample.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("`{0}` is not numeric")]
    NotNumeric(String),

    #[error("`{0}` is not a finite number")]
    NotFinite(String),

    #[error("counter value {0} is negative")]
    NegativeCounter(f64),
}

/// Convenience result type.
pub type WatcherResult<T> = std::result::Result<T, WatcherError>;
