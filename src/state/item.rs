use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::state::PageDescriptor;

/// Where an extracted item came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub site_name: String,

    /// Resolved URL of the page the item was extracted from
    pub source_url: String,

    /// Human-readable rendering of the page descriptor
    pub page: String,

    pub fetched_at: DateTime<Utc>,
}

/// One structured record extracted from a page.
///
/// Field values are strings after transforms; optional fields that matched
/// nothing are simply absent from the map. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub fields: BTreeMap<String, String>,
    pub provenance: Provenance,
}

impl ExtractedItem {
    /// Content-derived key making sink writes idempotent: the same item
    /// from the same page always hashes to the same key, regardless of
    /// when it was fetched.
    pub fn item_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provenance.site_name.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.provenance.source_url.as_bytes());
        for (name, value) in &self.fields {
            hasher.update(b"\x1f");
            hasher.update(name.as_bytes());
            hasher.update(b"\x1e");
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Pagination signal produced alongside a page's items
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSignal {
    /// Another page to fetch
    Next(PageDescriptor),

    /// The source is exhausted
    NoMore,

    /// Extraction could not evaluate the signal
    Error(String),
}

/// Everything one fetch/extract cycle yields, consumed once by the
/// pagination driver
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub items: Vec<ExtractedItem>,

    /// Items dropped because a required field was missing
    pub dropped: u32,

    pub next: NextSignal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_item(fields: &[(&str, &str)], url: &str) -> ExtractedItem {
        ExtractedItem {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            provenance: Provenance {
                site_name: "test-site".to_string(),
                source_url: url.to_string(),
                page: "page 1".to_string(),
                fetched_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_item_key_ignores_fetch_time() {
        let a = create_test_item(&[("title", "Widget")], "https://example.com/1");
        let mut b = a.clone();
        b.provenance.fetched_at = Utc::now() + chrono::Duration::hours(1);

        assert_eq!(a.item_key(), b.item_key());
    }

    #[test]
    fn test_item_key_differs_by_content() {
        let a = create_test_item(&[("title", "Widget")], "https://example.com/1");
        let b = create_test_item(&[("title", "Gadget")], "https://example.com/1");
        let c = create_test_item(&[("title", "Widget")], "https://example.com/2");

        assert_ne!(a.item_key(), b.item_key());
        assert_ne!(a.item_key(), c.item_key());
    }

    #[test]
    fn test_item_key_field_name_matters() {
        // Same concatenated bytes must not collide across field boundaries
        let a = create_test_item(&[("ab", "c")], "https://example.com/1");
        let b = create_test_item(&[("a", "bc")], "https://example.com/1");
        assert_ne!(a.item_key(), b.item_key());
    }
}
