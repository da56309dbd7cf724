use thiserror::Error;

/// Result type alias for chatswarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Errors that can occur while driving simulated sessions
#[derive(Error, Debug, Clone)]
pub enum SwarmError {
    /// Missing or invalid runtime configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Permission dataset could not be loaded
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Stream handshake or request-level connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish call returned a non-created status
    #[error("Publish rejected: status={status} url={url} body={body}")]
    Publish {
        status: u16,
        url: String,
        body: String,
    },

    /// Error on an established streaming connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Message serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Internal session error
    #[error("Session error: {0}")]
    Session(String),
}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        SwarmError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SwarmError {
    fn from(err: reqwest::Error) -> Self {
        SwarmError::Connection(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SwarmError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SwarmError::Transport(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SwarmError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        SwarmError::Timeout { timeout_ms: 0 }
    }
}

impl SwarmError {
    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            SwarmError::Config(_) => "configuration",
            SwarmError::Dataset(_) => "dataset",
            SwarmError::Connection(_) => "connection",
            SwarmError::Publish { .. } => "publish",
            SwarmError::Transport(_) => "transport",
            SwarmError::Serialization(_) => "serialization",
            SwarmError::Timeout { .. } => "timeout",
            SwarmError::Session(_) => "session",
        }
    }

    /// Fatal errors abort the whole run before any session starts;
    /// everything else stays local to the session that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SwarmError::Config(_) | SwarmError::Dataset(_))
    }
}
