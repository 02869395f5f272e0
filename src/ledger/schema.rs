//! Ledger schema and migrations.

use rusqlite::Connection;

use super::error::LedgerError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 2;

/// The ledger table is append-only: triggers reject updates and deletes.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    dest_key TEXT PRIMARY KEY NOT NULL,
    item_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    completed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_item_id ON ledger(item_id);

CREATE TRIGGER IF NOT EXISTS ledger_no_update BEFORE UPDATE ON ledger
BEGIN
    SELECT RAISE(ABORT, 'ledger is append-only');
END;

CREATE TRIGGER IF NOT EXISTS ledger_no_delete BEFORE DELETE ON ledger
BEGIN
    SELECT RAISE(ABORT, 'ledger is append-only');
END;

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    items_indexed INTEGER DEFAULT 0,
    downloaded INTEGER DEFAULT 0,
    already_present INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#;

/// Renditions per item, so a resumed run skips the variant lookup. This is a
/// cache: rows are replaced on refresh.
const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS variants (
    item_id TEXT PRIMARY KEY NOT NULL,
    variants_json TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Initialize or migrate the ledger schema. Idempotent.
pub(crate) fn migrate(conn: &Connection) -> Result<(), LedgerError> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(LedgerError::UnsupportedSchemaVersion {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }

    if current < 1 {
        conn.execute_batch(SCHEMA_V1)?;
    }
    if current < 2 {
        conn.execute_batch(SCHEMA_V2)?;
    }
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::debug!(
            "Migrated ledger schema from version {} to {}",
            current,
            SCHEMA_VERSION
        );
    }

    Ok(())
}
