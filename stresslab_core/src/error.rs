//! Unified error handling for stresslab
//!
//! Every fallible operation in the churn engine, the transports and the
//! throughput harness returns a [`StressError`]. The variants double as the
//! error taxonomy the workers classify against: `NotFound` and `Timeout` are
//! expected churn noise, everything else is a real failure.

use thiserror::Error;

/// Main error type for stresslab operations
#[derive(Debug, Error)]
pub enum StressError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resolution found no matching endpoint within its wait bound
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A readiness, metadata or clock query exceeded its bound
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Any other failure surfaced by the transport while opening,
    /// transferring or closing an endpoint
    #[error("Transport error on '{endpoint}': {message}")]
    Transport { endpoint: String, message: String },

    /// A worker thread could not be created
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// The throughput harness could not find or connect to its counterpart
    #[error("Startup failed: {0}")]
    StartupFailed(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors with source location for debugging.
    /// Use the `stress_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// return Err(stress_internal!("worker {} has no handle", id));
/// ```
#[macro_export]
macro_rules! stress_internal {
    ($($arg:tt)*) => {
        $crate::error::StressError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using StressError
pub type StressResult<T> = std::result::Result<T, StressError>;

impl From<serde_json::Error> for StressError {
    fn from(err: serde_json::Error) -> Self {
        StressError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StressError {
    fn from(err: toml::de::Error) -> Self {
        StressError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_yaml::Error> for StressError {
    fn from(err: serde_yaml::Error) -> Self {
        StressError::Config(format!("YAML parse error: {}", err))
    }
}

impl From<std::num::ParseIntError> for StressError {
    fn from(err: std::num::ParseIntError) -> Self {
        StressError::Parse(format!("Integer parse error: {}", err))
    }
}

impl From<std::num::ParseFloatError> for StressError {
    fn from(err: std::num::ParseFloatError) -> Self {
        StressError::Parse(format!("Float parse error: {}", err))
    }
}

// Helper methods
impl StressError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StressError::Config(msg.into())
    }

    /// Create a transport error for a named endpoint
    pub fn transport<S: Into<String>, T: Into<String>>(endpoint: S, message: T) -> Self {
        StressError::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        StressError::NotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        StressError::Timeout(msg.into())
    }

    /// Not-found and timeout are routine under churn: endpoints come and go
    /// faster than consumers can resolve them.
    pub fn is_expected_churn(&self) -> bool {
        matches!(self, StressError::NotFound(_) | StressError::Timeout(_))
    }
}
