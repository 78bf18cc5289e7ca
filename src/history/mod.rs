//! Run history
//!
//! One record per completed site-run, kept in a small meta database.
//! Recording is fire-and-forget from the engine's perspective: a history
//! failure is logged and swallowed, never surfaced as a run error.

use crate::state::{SiteOutcome, TerminalReason};
use crate::RakeError;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// One site-run as stored in history
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub site_name: String,
    pub started_at: String,
    pub finished_at: String,
    pub pages_fetched: u32,
    pub items_extracted: u64,
    pub terminal: TerminalReason,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub spec_hash: String,
}

impl RunRecord {
    pub fn from_outcome(outcome: &SiteOutcome, spec_hash: &str) -> Self {
        Self {
            site_name: outcome.site_name.clone(),
            started_at: outcome.started_at.to_rfc3339(),
            finished_at: outcome.finished_at.to_rfc3339(),
            pages_fetched: outcome.pages_fetched,
            items_extracted: outcome.items_extracted,
            terminal: outcome.terminal,
            error_count: outcome.errors.len() as u32,
            last_error: outcome.errors.last().cloned(),
            spec_hash: spec_hash.to_string(),
        }
    }
}

/// Persistent store for run records
pub struct RunHistoryStore {
    db_path: PathBuf,
}

impl RunHistoryStore {
    /// Opens (creating if needed) the history database
    pub fn new(db_path: &Path) -> Result<Self, RakeError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                pages_fetched INTEGER NOT NULL,
                items_extracted INTEGER NOT NULL,
                terminal TEXT NOT NULL,
                error_count INTEGER NOT NULL,
                last_error TEXT,
                spec_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_history_site
                ON run_history (site_name, finished_at);",
        )?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    /// Appends one record. Errors propagate to the caller, which treats
    /// them as advisory.
    pub fn record_run(&self, record: &RunRecord) -> Result<(), RakeError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO run_history
                (site_name, started_at, finished_at, pages_fetched, items_extracted,
                 terminal, error_count, last_error, spec_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.site_name,
                record.started_at,
                record.finished_at,
                record.pages_fetched,
                record.items_extracted,
                record.terminal.as_str(),
                record.error_count,
                record.last_error,
                record.spec_hash,
            ],
        )?;
        Ok(())
    }

    /// Latest run per site, ordered by site name
    pub fn last_runs(&self) -> Result<Vec<RunRecord>, RakeError> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT h1.site_name, h1.started_at, h1.finished_at, h1.pages_fetched,
                    h1.items_extracted, h1.terminal, h1.error_count, h1.last_error, h1.spec_hash
             FROM run_history h1
             JOIN (
                 SELECT site_name, MAX(finished_at) AS max_finished
                 FROM run_history
                 GROUP BY site_name
             ) h2 ON h1.site_name = h2.site_name AND h1.finished_at = h2.max_finished
             ORDER BY h1.site_name ASC",
        )?;

        let rows = stmt.query_map([], row_to_record)?;
        collect_records(rows)
    }

    /// Most recent runs for one site, newest first
    pub fn site_history(&self, site: &str, limit: u32) -> Result<Vec<RunRecord>, RakeError> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT site_name, started_at, finished_at, pages_fetched, items_extracted,
                    terminal, error_count, last_error, spec_hash
             FROM run_history
             WHERE site_name = ?1
             ORDER BY finished_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![site, limit], row_to_record)?;
        collect_records(rows)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let terminal: String = row.get(5)?;
    Ok(RunRecord {
        site_name: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        pages_fetched: row.get(3)?,
        items_extracted: row.get(4)?,
        terminal: TerminalReason::from_str(&terminal).unwrap_or(TerminalReason::PageFailed),
        error_count: row.get(6)?,
        last_error: row.get(7)?,
        spec_hash: row.get(8)?,
    })
}

fn collect_records<'a>(
    rows: impl Iterator<Item = rusqlite::Result<RunRecord>> + 'a,
) -> Result<Vec<RunRecord>, RakeError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}
