use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] calmly_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Journal body cannot be empty")]
    EmptyContent,
    #[error("Entry ID cannot be empty")]
    EmptyId,
    #[error("Nothing to change: pass --score and/or --note")]
    NothingToEdit,
    #[error("No entry found for id/prefix: {0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is not configured. Pass --api-url or set CALMLY_API_URL.")]
    SyncNotConfigured,
}
