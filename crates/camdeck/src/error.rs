//! Error types for camdeck.
//!
//! Expected outcomes of the control surface (rate limiting, invalid
//! transitions, an unavailable analyzer) are ordinary values, see
//! [`ErrorKind`]. The [`Error`] enum covers the failures that do abort an
//! operation: configuration, binding the listener, and I/O.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for camdeck operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Server Errors ===
    /// Failed to bind the HTTP listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Server(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read a source file for analysis.
    #[error("failed to read {path}: {source}")]
    SourceRead {
        /// Path that couldn't be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Analysis Errors ===
    /// An analyzer could not be built or failed outside the control surface.
    #[error("analysis error: {0}")]
    Analyzer(#[from] crate::analysis::AnalyzerError),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for camdeck operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new server error.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }
}

/// Outcome categories reported to callers inside results.
///
/// None of these abort a request; they travel inside
/// [`CommandResult`](crate::facade::CommandResult) and
/// [`AnalysisOutcome`](crate::facade::AnalysisOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Admission denied. Back off and retry later.
    RateLimited,
    /// The command is not valid in the current state. Resync against
    /// `state_after`.
    InvalidTransition,
    /// `start` while the camera is already running or paused. Nothing changed.
    AlreadyActive,
    /// The device could not be acquired, read, or released.
    DeviceUnavailable,
    /// The analysis collaborator is not configured or failed.
    AnalyzerUnavailable,
}

impl ErrorKind {
    /// Whether a caller can expect a later retry to behave differently
    /// without any other action on their part.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::DeviceUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::InvalidTransition => write!(f, "invalid_transition"),
            Self::AlreadyActive => write!(f, "already_active"),
            Self::DeviceUnavailable => write!(f, "device_unavailable"),
            Self::AnalyzerUnavailable => write!(f, "analyzer_unavailable"),
        }
    }
}
