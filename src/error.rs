//! Error types for the fuel anomaly pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for preprocessing, detection and persistence
#[derive(Debug, Error)]
pub enum Error {
    /// No (or too few) records survived cleaning
    #[error("Insufficient data: {0}")]
    Data(String),

    /// Operation requires a trained detector or fitted preprocessor
    #[error("Invalid state: {0}")]
    State(String),

    /// Feature set incompatible with the fitted feature list
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Invalid parameter
    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Background worker panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status the API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Data(_) => 422,
            Error::State(_) => 409,
            Error::Shape(_) | Error::InvalidParameter { .. } => 400,
            Error::Config(_) | Error::Json(_) | Error::Io(_) | Error::Task(_) => 500,
        }
    }

    /// "Not ready" / "insufficient data" class of errors
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
