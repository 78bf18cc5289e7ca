//! Result sink contract
//!
//! A sink accepts batches of provenance-tagged items for durable storage.
//! Writes must be idempotent under retry: flushing the same batch twice
//! yields the same stored row set as flushing it once, keyed on each
//! item's content-derived key.

use crate::state::ExtractedItem;
use thiserror::Error;

/// Errors that can occur during sink operations
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Site '{0}' was never registered with this sink")]
    UnknownSite(String),

    #[error("Invalid site name for storage: {0}")]
    InvalidSite(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for extracted items.
///
/// The orchestrator registers every site before its first batch, writes
/// page-sized batches during the run, and flushes before exit; nothing is
/// lost on a normal shutdown.
pub trait ResultSink: Send {
    /// Prepares storage for a site (tables, schema evolution, overwrite
    /// handling). Called once per site per run, before any write.
    fn register_site(&mut self, spec: &crate::config::SiteSpec) -> SinkResult<()>;

    /// Stores one batch, upserting by item key. Returns the number of
    /// items accepted.
    fn write(&mut self, site: &str, batch: &[ExtractedItem]) -> SinkResult<usize>;

    /// Forces buffered rows to durable storage
    fn flush(&mut self) -> SinkResult<()>;
}
