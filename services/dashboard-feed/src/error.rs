//! Error types for the dashboard feed

/// Errors that can occur in the dashboard feed
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Feed closed: {0}")]
    Closed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;
