//! Resume ledger: the durable record of completed downloads.
//!
//! Entries are keyed by destination path relative to the download root and
//! are never overwritten or deleted. [`Ledger`] keeps the full key set in
//! memory for O(1) membership checks and writes through to a
//! [`LedgerStore`] on every completion.

pub mod error;
pub mod lock;
pub mod schema;
pub mod sqlite;
pub mod types;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::catalog::Variant;

pub use error::LedgerError;
pub use lock::RunLock;
pub use sqlite::SqliteLedger;
pub use types::{LedgerEntry, LedgerSummary, RunStats};

/// Durable, append-only storage behind the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Every key recorded so far.
    async fn load_keys(&self) -> Result<HashSet<String>, LedgerError>;

    /// Insert one entry atomically. Returns false, leaving the stored entry
    /// untouched, if the key already exists.
    async fn append(&self, entry: &LedgerEntry) -> Result<bool, LedgerError>;

    async fn summary(&self) -> Result<LedgerSummary, LedgerError>;

    async fn start_run(&self) -> Result<i64, LedgerError>;

    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), LedgerError>;

    /// Renditions stored by an earlier lookup of `item_id`.
    async fn cached_variants(&self, item_id: &str) -> Result<Option<Vec<Variant>>, LedgerError>;

    /// Store or replace the renditions for `item_id`.
    async fn cache_variants(&self, item_id: &str, variants: &[Variant]) -> Result<(), LedgerError>;
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    keys: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Load every existing key from `store`.
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let keys = store.load_keys().await?;
        tracing::debug!(entries = keys.len(), "Loaded resume ledger");
        Ok(Self {
            store,
            keys: Mutex::new(keys),
        })
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Append an entry. The key becomes visible to [`Ledger::contains`] only
    /// once the store has accepted it.
    pub async fn record(&self, entry: LedgerEntry) -> Result<bool, LedgerError> {
        let inserted = self.store.append(&entry).await?;
        self.keys().insert(entry.key);
        Ok(inserted)
    }

    /// Cached renditions for `item_id`. A cache that can't be read counts as
    /// a miss.
    pub async fn cached_variants(&self, item_id: &str) -> Option<Vec<Variant>> {
        match self.store.cached_variants(item_id).await {
            Ok(variants) => variants,
            Err(e) => {
                tracing::warn!(item = item_id, "Ignoring variant cache: {}", e);
                None
            }
        }
    }

    /// Remember renditions for the next run. Failures only cost a lookup.
    pub async fn cache_variants(&self, item_id: &str, variants: &[Variant]) {
        if let Err(e) = self.store.cache_variants(item_id, variants).await {
            tracing::warn!(item = item_id, "Failed to cache variants: {}", e);
        }
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(key: &str) -> LedgerEntry {
        LedgerEntry {
            key: key.into(),
            item_id: "1".into(),
            collection: "Vacation 2023".into(),
            bytes: 4,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_loads_existing_keys() {
        let store = Arc::new(SqliteLedger::open_in_memory().unwrap());
        store.append(&entry("Vacation 2023/sunset_1.jpg")).await.unwrap();

        let ledger = Ledger::open(store).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains("Vacation 2023/sunset_1.jpg"));
        assert!(!ledger.contains("Vacation 2023/beach_2.jpg"));
    }

    #[tokio::test]
    async fn test_record_makes_key_visible() {
        let store = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let ledger = Ledger::open(store.clone()).await.unwrap();
        assert!(ledger.is_empty());

        assert!(ledger.record(entry("A/x_1.jpg")).await.unwrap());
        assert!(ledger.contains("A/x_1.jpg"));
        assert!(!ledger.record(entry("A/x_1.jpg")).await.unwrap());
        assert_eq!(store.load_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_variant_cache_is_a_miss() {
        let store = Arc::new(SqliteLedger::open_in_memory().unwrap());
        store.insert_raw_variants("1", "not json");
        let ledger = Ledger::open(store).await.unwrap();
        assert!(ledger.cached_variants("1").await.is_none());
    }
}
