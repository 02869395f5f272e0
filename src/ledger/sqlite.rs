//! SQLite implementation of [`LedgerStore`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::LedgerError;
use super::schema;
use super::types::{LastRun, LedgerEntry, LedgerSummary, RunStats};
use super::LedgerStore;
use crate::catalog::Variant;

pub struct SqliteLedger {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create the ledger database at `path`.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| LedgerError::Open {
                path: path_clone.clone(),
                source: e,
            })?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(LedgerError::Migration)?;
            // FULL so an entry survives power loss once append() returns.
            conn.pragma_update(None, "synchronous", "FULL")
                .map_err(LedgerError::Migration)?;
            schema::migrate(&conn)?;
            Ok::<_, LedgerError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|e| LedgerError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_raw_variants(&self, item_id: &str, json: &str) {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO variants (item_id, variants_json, fetched_at) VALUES (?1, ?2, 0)",
                rusqlite::params![item_id, json],
            )
            .unwrap();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn load_keys(&self) -> Result<HashSet<String>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT dest_key FROM ledger")
            .map_err(LedgerError::query)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(LedgerError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(LedgerError::query)?;
        Ok(keys)
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO ledger (dest_key, item_id, collection, size_bytes, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(dest_key) DO NOTHING",
                rusqlite::params![
                    entry.key,
                    entry.item_id,
                    entry.collection,
                    entry.bytes as i64,
                    entry.completed_at.timestamp(),
                ],
            )
            .map_err(LedgerError::query)?;
        Ok(changed == 1)
    }

    async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let conn = self.conn()?;

        let (entries, total_bytes, collections): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), COUNT(DISTINCT collection) FROM ledger",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(LedgerError::query)?;

        let last_run = conn
            .query_row(
                "SELECT started_at, completed_at, downloaded, failed, interrupted
                 FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(LastRun {
                        started_at: timestamp(row.get(0)?),
                        completed_at: timestamp(row.get(1)?),
                        downloaded: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                        failed: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                        interrupted: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
                    })
                },
            )
            .optional()
            .map_err(LedgerError::query)?;

        Ok(LedgerSummary {
            entries: entries as u64,
            total_bytes: total_bytes as u64,
            collections: collections as u64,
            last_run,
        })
    }

    async fn start_run(&self) -> Result<i64, LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [Utc::now().timestamp()],
        )
        .map_err(LedgerError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, items_indexed = ?2, downloaded = ?3,
             already_present = ?4, failed = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                Utc::now().timestamp(),
                stats.items_indexed as i64,
                stats.downloaded as i64,
                stats.already_present as i64,
                stats.failed as i64,
                i64::from(stats.interrupted),
                run_id
            ],
        )
        .map_err(LedgerError::query)?;
        Ok(())
    }

    async fn cached_variants(&self, item_id: &str) -> Result<Option<Vec<Variant>>, LedgerError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT variants_json FROM variants WHERE item_id = ?1",
                [item_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::query)?;
        json.map(|j| {
            serde_json::from_str(&j).map_err(|source| LedgerError::CachedVariants {
                item_id: item_id.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn cache_variants(&self, item_id: &str, variants: &[Variant]) -> Result<(), LedgerError> {
        let json = serde_json::to_string(variants).map_err(|source| LedgerError::CachedVariants {
            item_id: item_id.to_string(),
            source,
        })?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO variants (item_id, variants_json, fetched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id) DO UPDATE SET
                variants_json = excluded.variants_json,
                fetched_at = excluded.fetched_at",
            rusqlite::params![item_id, json, Utc::now().timestamp()],
        )
        .map_err(LedgerError::query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MediaKind;

    fn entry(key: &str, bytes: u64) -> LedgerEntry {
        LedgerEntry {
            key: key.into(),
            item_id: key.rsplit('_').next().unwrap_or(key).into(),
            collection: key.split('/').next().unwrap_or_default().into(),
            bytes,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let db = SqliteLedger::open_in_memory().unwrap();
        assert!(db.append(&entry("Vacation/sunset_1.jpg", 10)).await.unwrap());
        assert!(db.append(&entry("Vacation/beach_2.jpg", 20)).await.unwrap());

        let keys = db.load_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("Vacation/sunset_1.jpg"));
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected_without_overwrite() {
        let db = SqliteLedger::open_in_memory().unwrap();
        assert!(db.append(&entry("Vacation/sunset_1.jpg", 10)).await.unwrap());
        assert!(!db.append(&entry("Vacation/sunset_1.jpg", 99)).await.unwrap());

        let summary = db.summary().await.unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.total_bytes, 10);
    }

    #[tokio::test]
    async fn test_summary_counts_and_last_run() {
        let db = SqliteLedger::open_in_memory().unwrap();
        db.append(&entry("A/x_1.jpg", 5)).await.unwrap();
        db.append(&entry("B/y_2.jpg", 7)).await.unwrap();

        let empty = db.summary().await.unwrap();
        assert!(empty.last_run.is_none());

        let run = db.start_run().await.unwrap();
        db.complete_run(
            run,
            &RunStats {
                items_indexed: 3,
                downloaded: 2,
                already_present: 1,
                failed: 0,
                interrupted: true,
            },
        )
        .await
        .unwrap();

        let summary = db.summary().await.unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.total_bytes, 12);
        assert_eq!(summary.collections, 2);
        let last = summary.last_run.unwrap();
        assert_eq!(last.downloaded, 2);
        assert!(last.interrupted);
        assert!(last.completed_at.is_some());
    }

    fn variant(label: &str, url: &str) -> Variant {
        Variant {
            label: label.into(),
            width: 2048,
            height: 1536,
            url: url.into(),
            size: Some(1234),
            media: MediaKind::Photo,
        }
    }

    #[tokio::test]
    async fn test_variant_cache_round_trip_and_refresh() {
        let db = SqliteLedger::open_in_memory().unwrap();
        assert!(db.cached_variants("1").await.unwrap().is_none());

        let first = vec![variant("Original", "https://cdn.example.com/1_o.jpg")];
        db.cache_variants("1", &first).await.unwrap();
        assert_eq!(db.cached_variants("1").await.unwrap(), Some(first));

        let fresh = vec![
            variant("Original", "https://cdn.example.com/1_new_o.jpg"),
            variant("Large", "https://cdn.example.com/1_new_b.jpg"),
        ];
        db.cache_variants("1", &fresh).await.unwrap();
        assert_eq!(db.cached_variants("1").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let db = SqliteLedger::open(&path).await.unwrap();
            db.append(&entry("A/x_1.jpg", 5)).await.unwrap();
        }
        let db = SqliteLedger::open(&path).await.unwrap();
        assert_eq!(db.path(), path.as_path());
        assert!(db.load_keys().await.unwrap().contains("A/x_1.jpg"));
    }
}
