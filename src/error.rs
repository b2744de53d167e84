//! # Error Types
//!
//! Custom error types for the telemetry uplink using `thiserror`.
//!
//! Every variant is recoverable. Transport failures degrade the link to
//! disconnected, buffer failures fall back to the secondary store, and a
//! corrupt buffer document is read as empty.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the telemetry uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Could not establish (or verify) a link to the collector
    #[error("Transport connect failed: {0}")]
    TransportConnect(String),

    /// A write to an established link failed or timed out
    #[error("Transport send failed: {0}")]
    TransportSend(String),

    /// Reading or writing a buffer store failed
    #[error("Buffer I/O error at {}: {source}", path.display())]
    BufferIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Existing buffer content could not be parsed
    #[error("Buffer at {} is corrupt: {reason}", path.display())]
    BufferCorrupt { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The controller has been shut down and no longer accepts work
    #[error("Uplink has been shut down")]
    Stopped,
}

/// Result type alias for the telemetry uplink
pub type Result<T> = std::result::Result<T, UplinkError>;
