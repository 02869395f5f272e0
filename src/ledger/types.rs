use chrono::{DateTime, Utc};

/// One completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Destination path relative to the download root, `/`-separated.
    pub key: String,
    pub item_id: String,
    pub collection: String,
    pub bytes: u64,
    pub completed_at: DateTime<Utc>,
}

/// Counters recorded at the end of a sync run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub items_indexed: u64,
    pub downloaded: u64,
    pub already_present: u64,
    pub failed: u64,
    pub interrupted: bool,
}

/// The most recent row of `sync_runs`.
#[derive(Debug, Clone)]
pub struct LastRun {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub downloaded: u64,
    pub failed: u64,
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub entries: u64,
    pub total_bytes: u64,
    pub collections: u64,
    pub last_run: Option<LastRun>,
}
