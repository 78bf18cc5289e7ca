//! SQLite result sink
//!
//! One table per site, named after the sanitized site name, with the
//! provenance columns every stored record carries and one TEXT column per
//! configured field. New fields appearing in a spec are added with
//! `ALTER TABLE ADD COLUMN`. Rows are keyed on the item's content-derived
//! key, so a retried flush upserts instead of duplicating.

use crate::config::{OutputMode, SiteSpec};
use crate::sink::traits::{ResultSink, SinkError, SinkResult};
use crate::state::ExtractedItem;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use std::path::PathBuf;

struct SiteTable {
    conn: Connection,
    table: String,
    columns: Vec<String>,
}

/// Per-site SQLite storage with idempotent upsert semantics
pub struct SqliteSink {
    sites: HashMap<String, SiteTable>,
}

impl SqliteSink {
    pub fn new() -> Self {
        Self {
            sites: HashMap::new(),
        }
    }

    fn database_path(spec: &SiteSpec) -> PathBuf {
        let destination = PathBuf::from(&spec.output.destination);
        if destination.extension().is_some_and(|ext| ext == "db") {
            destination
        } else {
            destination.join(format!("{}.db", spec.site_name))
        }
    }

    fn table_name(site: &str) -> SinkResult<String> {
        let sanitized: String = site
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        if !sanitized.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(SinkError::InvalidSite(site.to_string()));
        }
        Ok(sanitized)
    }

    fn create_or_evolve(
        conn: &Connection,
        table: &str,
        field_names: &[String],
    ) -> SinkResult<Vec<String>> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_key TEXT NOT NULL UNIQUE,
                site_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            );"
        ))?;

        let mut existing: Vec<String> = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            for row in rows {
                existing.push(row?);
            }
        }

        // One column per configured field; TEXT keeps the schema stable
        // across transform changes
        for field in field_names {
            if !existing.iter().any(|c| c == field) {
                conn.execute(
                    &format!("ALTER TABLE {table} ADD COLUMN {field} TEXT"),
                    [],
                )?;
                existing.push(field.clone());
            }
        }

        Ok(existing.into_iter().filter(|c| c != "id").collect())
    }
}

impl Default for SqliteSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for SqliteSink {
    fn register_site(&mut self, spec: &SiteSpec) -> SinkResult<()> {
        let table = Self::table_name(&spec.site_name)?;
        let path = Self::database_path(spec);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let field_names: Vec<String> = spec.selectors.fields.keys().cloned().collect();
        let columns = Self::create_or_evolve(&conn, &table, &field_names)?;

        if spec.output.mode == OutputMode::Overwrite {
            conn.execute(
                &format!("DELETE FROM {table} WHERE site_name = ?1"),
                [&spec.site_name],
            )?;
        }

        tracing::debug!(
            "Sink ready for {} at {} (table {})",
            spec.site_name,
            path.display(),
            table
        );

        self.sites.insert(
            spec.site_name.clone(),
            SiteTable {
                conn,
                table,
                columns,
            },
        );
        Ok(())
    }

    fn write(&mut self, site: &str, batch: &[ExtractedItem]) -> SinkResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let site_table = self
            .sites
            .get_mut(site)
            .ok_or_else(|| SinkError::UnknownSite(site.to_string()))?;

        let field_columns: Vec<&String> = site_table
            .columns
            .iter()
            .filter(|c| {
                c.as_str() != "item_key"
                    && c.as_str() != "site_name"
                    && c.as_str() != "source_url"
                    && c.as_str() != "fetched_at"
            })
            .collect();

        let mut columns = vec!["item_key", "site_name", "source_url", "fetched_at"];
        columns.extend(field_columns.iter().map(|c| c.as_str()));

        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let updates: Vec<String> = columns
            .iter()
            .skip(1)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(item_key) DO UPDATE SET {}",
            site_table.table,
            columns.join(", "),
            placeholders.join(", "),
            updates.join(", "),
        );

        let tx = site_table.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for item in batch {
                let mut values: Vec<Option<String>> = vec![
                    Some(item.item_key()),
                    Some(item.provenance.site_name.clone()),
                    Some(item.provenance.source_url.clone()),
                    Some(item.provenance.fetched_at.to_rfc3339()),
                ];
                for column in &field_columns {
                    values.push(item.fields.get(column.as_str()).cloned());
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        Ok(batch.len())
    }

    fn flush(&mut self) -> SinkResult<()> {
        // Batches commit transactionally in write(); nothing is buffered
        // between calls.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::create_test_spec;
    use crate::state::Provenance;
    use chrono::Utc;

    fn create_test_item(title: &str, url: &str) -> ExtractedItem {
        ExtractedItem {
            fields: [("title".to_string(), title.to_string())].into(),
            provenance: Provenance {
                site_name: "test-site".to_string(),
                source_url: url.to_string(),
                page: "page 1".to_string(),
                fetched_at: Utc::now(),
            },
        }
    }

    fn sink_with_site(dir: &std::path::Path) -> (SqliteSink, SiteSpec) {
        let mut spec = create_test_spec();
        spec.output.destination = dir.to_string_lossy().to_string();
        let mut sink = SqliteSink::new();
        sink.register_site(&spec).unwrap();
        (sink, spec)
    }

    fn count_rows(spec: &SiteSpec) -> i64 {
        let path = SqliteSink::database_path(spec);
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM test_site", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_write_persists_rows_with_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, spec) = sink_with_site(dir.path());

        let batch = vec![
            create_test_item("Alpha", "https://example.com/1"),
            create_test_item("Beta", "https://example.com/1"),
        ];
        assert_eq!(sink.write("test-site", &batch).unwrap(), 2);
        assert_eq!(count_rows(&spec), 2);

        let path = SqliteSink::database_path(&spec);
        let conn = Connection::open(path).unwrap();
        let (title, source_url): (String, String) = conn
            .query_row(
                "SELECT title, source_url FROM test_site ORDER BY title LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(title, "Alpha");
        assert_eq!(source_url, "https://example.com/1");
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, spec) = sink_with_site(dir.path());

        let batch = vec![
            create_test_item("Alpha", "https://example.com/1"),
            create_test_item("Beta", "https://example.com/1"),
        ];

        sink.write("test-site", &batch).unwrap();
        sink.write("test-site", &batch).unwrap();

        // A retried flush must not duplicate stored rows
        assert_eq!(count_rows(&spec), 2);
    }

    #[test]
    fn test_unknown_site_is_rejected() {
        let mut sink = SqliteSink::new();
        let batch = vec![create_test_item("Alpha", "https://example.com/1")];
        assert!(matches!(
            sink.write("ghost", &batch),
            Err(SinkError::UnknownSite(_))
        ));
    }

    #[test]
    fn test_schema_evolves_with_new_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, mut spec) = sink_with_site(dir.path());

        let batch = vec![create_test_item("Alpha", "https://example.com/1")];
        sink.write("test-site", &batch).unwrap();

        // A later run adds a field; the existing table grows a column
        spec.selectors.fields.insert(
            "price".to_string(),
            spec.selectors.fields["title"].clone(),
        );
        sink.register_site(&spec).unwrap();

        let mut item = create_test_item("Gamma", "https://example.com/2");
        item.fields.insert("price".to_string(), "9.99".to_string());
        sink.write("test-site", &[item]).unwrap();

        assert_eq!(count_rows(&spec), 2);
    }

    #[test]
    fn test_overwrite_mode_clears_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, mut spec) = sink_with_site(dir.path());

        sink.write(
            "test-site",
            &[create_test_item("Old", "https://example.com/old")],
        )
        .unwrap();

        spec.output.mode = OutputMode::Overwrite;
        sink.register_site(&spec).unwrap();
        sink.write(
            "test-site",
            &[create_test_item("New", "https://example.com/new")],
        )
        .unwrap();

        assert_eq!(count_rows(&spec), 1);
    }

    #[test]
    fn test_table_name_sanitization() {
        assert_eq!(SqliteSink::table_name("books-site").unwrap(), "books_site");
        assert_eq!(SqliteSink::table_name("ok_name").unwrap(), "ok_name");
        assert!(SqliteSink::table_name("---").is_err());
    }
}
