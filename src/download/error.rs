use thiserror::Error;

use crate::catalog::CatalogError;
use crate::ledger::LedgerError;

/// How the worker pool should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, timeout, throttling, server error: requeue with backoff.
    Transient,
    /// Bytes on disk don't match what the server declared: retry once.
    Integrity,
    /// Not found, forbidden, no usable variant, local disk trouble.
    Permanent,
}

/// Typed per-task download errors enabling retry classification.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("No variant of {item_id} satisfies the quality policy")]
    NoVariant { item_id: String },

    #[error("Incomplete download of {path}: expected {expected:?} bytes, wrote {written}")]
    Integrity {
        path: String,
        expected: Option<u64>,
        written: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Failed to record completion: {0}")]
    Ledger(#[from] LedgerError),
}

impl DownloadError {
    pub fn class(&self) -> FailureClass {
        match self {
            DownloadError::Catalog(e) if e.is_transient() => FailureClass::Transient,
            DownloadError::Catalog(_) => FailureClass::Permanent,
            DownloadError::Integrity { .. } => FailureClass::Integrity,
            DownloadError::NoVariant { .. }
            | DownloadError::Disk(_)
            | DownloadError::Ledger(_) => FailureClass::Permanent,
        }
    }
}
