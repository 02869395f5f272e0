//! Exclusive run lock next to the ledger database.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::fs_std::FileExt;

use super::error::LedgerError;

/// Held for the duration of a sync run. Two runs sharing a ledger would
/// race on the same destination files, so the second one is refused.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

impl RunLock {
    pub async fn acquire(ledger_dir: &Path) -> Result<Self, LedgerError> {
        let path = ledger_dir.join("flickrpd.lock");
        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .map_err(|source| LedgerError::Lock {
                    path: lock_path.clone(),
                    source,
                })?;
            file.try_lock_exclusive()
                .map_err(|_| LedgerError::Locked(lock_path.clone()))?;
            Ok::<File, LedgerError>(file)
        })
        .await??;
        tracing::debug!(path = %path.display(), "Acquired run lock");
        Ok(Self { _file: file })
    }
}
