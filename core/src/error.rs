/// Error types for the messaging client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network failure, non-success status, non-JSON body or `success: false`.
    /// Callers never see which one it was.
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Replica error: {0}")]
    Replica(String),
}

impl LinkError {
    /// Errors the user is told about directly
    pub fn is_user_facing(&self) -> bool {
        matches!(self, LinkError::Transport(_) | LinkError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
