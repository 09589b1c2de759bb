//! Error types for the replica's outer surfaces.
//!
//! The book itself never fails: anomalies are absorbed and logged. These
//! errors cover configuration, feed decoding and I/O around it.

use thiserror::Error;

/// Unified error type for the replica service.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Feed decoding error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reading a JSON-lines event feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// A line could not be decoded as an event.
    #[error("malformed event on line {line}: {source}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The book event channel was closed.
    #[error("book event channel closed")]
    ChannelClosed,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, ReplicaError>;
