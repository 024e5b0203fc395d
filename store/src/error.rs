//! Errors surfaced by the run database.

use thiserror::Error;

/// Errors produced while reading or writing the private/public run databases.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no checkpoint with id {0}")]
    NoSuchCheckpoint(i64),

    #[error("workflow_params missing required key: {0}")]
    MissingParam(&'static str),

    #[error("public database locked for longer than {0:?}")]
    PublicLocked(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, StoreError>;
