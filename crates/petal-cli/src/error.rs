//! Error handling for the Petal CLI

use thiserror::Error;

use petal_core::{PetalError, SendError};

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Realtime error: {0}")]
    Realtime(#[from] PetalError),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML writing error: {0}")]
    TomlWriting(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
