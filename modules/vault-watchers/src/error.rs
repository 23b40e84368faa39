use uuid::Uuid;

use crate::types::WatcherStatus;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("No known source matches url: {0}")]
    InvalidSource(String),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Watcher with this url already exists: {0}")]
    DuplicateWatcher(String),

    #[error("Watcher not found: {0}")]
    NotFound(Uuid),

    #[error("Watcher {id} is {status} and cannot be started")]
    TerminalWatcher { id: Uuid, status: WatcherStatus },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: WatcherStatus,
        to: WatcherStatus,
    },

    #[error("Invalid watcher settings: {0}")]
    InvalidSettings(String),

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Cursor data error: {0}")]
    Cursor(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for WatcherError {
    fn from(e: reqwest::Error) -> Self {
        WatcherError::SourceUnreachable(e.to_string())
    }
}
