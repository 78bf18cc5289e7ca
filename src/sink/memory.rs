//! In-memory result sink
//!
//! Mirrors the SQLite sink's upsert semantics without touching disk.
//! Handles are cheap clones over shared storage, so a test can keep one
//! and inspect what the engine stored after the run finishes.

use crate::config::SiteSpec;
use crate::sink::traits::{ResultSink, SinkError, SinkResult};
use crate::state::ExtractedItem;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Collects items per site, keyed like the durable sink
#[derive(Default, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<HashMap<String, BTreeMap<String, ExtractedItem>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored items for a site, in key order
    pub fn items(&self, site: &str) -> Vec<ExtractedItem> {
        self.inner
            .lock()
            .unwrap()
            .get(site)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, site: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(site)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

impl ResultSink for MemorySink {
    fn register_site(&mut self, spec: &SiteSpec) -> SinkResult<()> {
        self.inner
            .lock()
            .unwrap()
            .entry(spec.site_name.clone())
            .or_default();
        Ok(())
    }

    fn write(&mut self, site: &str, batch: &[ExtractedItem]) -> SinkResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner
            .get_mut(site)
            .ok_or_else(|| SinkError::UnknownSite(site.to_string()))?;

        for item in batch {
            rows.insert(item.item_key(), item.clone());
        }
        Ok(batch.len())
    }

    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}
