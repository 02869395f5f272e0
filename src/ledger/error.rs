//! Error types for the resume ledger.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Ledger migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Cached variants for {item_id} are unreadable: {source}")]
    CachedVariants {
        item_id: String,
        source: serde_json::Error,
    },

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    #[error("Another sync is already running against {0}")]
    Locked(PathBuf),

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl LedgerError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
