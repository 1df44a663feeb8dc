//! Error handling for the shell

use thiserror::Error;
use vellum::VellumError;

/// Result type for shell operations
pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Vellum(#[from] VellumError),

    #[error("Storage error: {0}")]
    Storage(#[from] vellum::StorageError),

    #[error("Invalid command: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Time formatting error: {0}")]
    Time(#[from] time::error::Format),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Errors that end the session instead of failing one command
    pub fn is_fatal(&self) -> bool {
        match self {
            ShellError::Io(_) | ShellError::Config(_) | ShellError::Storage(_) => true,
            ShellError::Vellum(e) => e.is_fatal(),
            _ => false,
        }
    }
}
