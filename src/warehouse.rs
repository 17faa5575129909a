// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQL warehouse holding job postings and their chunk table.
//!
//! The warehouse is reached through the [`Warehouse`] trait; the bundled
//! implementation keeps every table in a single SQLite database. CSV loads
//! follow load-job semantics: a header row names the columns, rows with the
//! wrong field count are counted as bad records, and the whole load is
//! rolled back once the bad-record budget is exceeded.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::model::{JobChunk, JobPosting};

/// Default number of malformed CSV rows tolerated per load.
pub const DEFAULT_MAX_BAD_RECORDS: usize = 100;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns true when `name` is usable as a table or column name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn ensure_identifier(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        bail!("Invalid table name '{}'", name);
    }
    Ok(())
}

/// Options for a CSV load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvLoadOptions {
    /// Leading rows to skip; the last skipped row is used as the header.
    pub skip_leading_rows: usize,
    /// Maximum malformed rows before the load fails.
    pub max_bad_records: usize,
}

impl Default for CsvLoadOptions {
    fn default() -> Self {
        Self {
            skip_leading_rows: 1,
            max_bad_records: DEFAULT_MAX_BAD_RECORDS,
        }
    }
}

/// Result of a successful CSV load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_loaded: usize,
    pub bad_records: usize,
}

/// Tabular store for postings and chunks.
pub trait Warehouse: Send {
    /// Appends CSV rows to `table`, creating it from the header if needed.
    fn load_csv(&mut self, table: &str, data: &[u8], options: &CsvLoadOptions)
        -> Result<LoadReport>;

    /// Atomically replaces `table` with the given chunk rows.
    fn replace_chunks(&mut self, table: &str, chunks: &[JobChunk]) -> Result<()>;

    /// Reads every posting from a table with at least `job_id` and `description`.
    fn fetch_postings(&self, table: &str) -> Result<Vec<JobPosting>>;

    /// Looks up a single posting by id.
    fn get_posting(&self, table: &str, job_id: &str) -> Result<Option<JobPosting>>;

    /// Reads a chunk table in insertion order.
    fn fetch_chunks(&self, table: &str) -> Result<Vec<JobChunk>>;

    fn table_exists(&self, table: &str) -> Result<bool>;

    fn row_count(&self, table: &str) -> Result<u64>;
}

/// SQLite-backed [`Warehouse`].
pub struct SqliteWarehouse {
    conn: Connection,
}

impl SqliteWarehouse {
    /// Opens or creates a warehouse database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open warehouse: {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Opens a throwaway in-memory warehouse.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory warehouse")?;
        Ok(Self { conn })
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        ensure_identifier(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read columns of {}", table))?;
        Ok(columns)
    }

    fn posting_select(&self, table: &str) -> Result<String> {
        let columns: HashSet<String> = self
            .columns(table)?
            .into_iter()
            .map(|c| c.to_lowercase())
            .collect();
        if columns.is_empty() {
            bail!("Table '{}' does not exist", table);
        }
        for required in ["job_id", "description"] {
            if !columns.contains(required) {
                bail!("Table '{}' has no '{}' column", table, required);
            }
        }
        let optional = |name: &str| {
            if columns.contains(name) {
                format!("\"{}\"", name)
            } else {
                "NULL".to_string()
            }
        };
        Ok(format!(
            "SELECT CAST(job_id AS TEXT), {}, {}, {}, COALESCE(description, '') FROM \"{}\"",
            optional("title"),
            optional("company"),
            optional("location"),
            table
        ))
    }

    fn row_to_posting(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobPosting> {
        Ok(JobPosting {
            job_id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            description: row.get(4)?,
        })
    }
}

/// Turns a CSV header cell into a column name.
fn column_name(raw: &str, position: usize, seen: &mut HashSet<String>) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        name = format!("column{}", position + 1);
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    let base = name.clone();
    let mut suffix = 2;
    while !seen.insert(name.clone()) {
        name = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    name
}

impl Warehouse for SqliteWarehouse {
    fn load_csv(
        &mut self,
        table: &str,
        data: &[u8],
        options: &CsvLoadOptions,
    ) -> Result<LoadReport> {
        ensure_identifier(table)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut header: Option<Vec<String>> = None;
        let mut rows: Vec<csv::StringRecord> = Vec::new();
        let mut bad_records = 0usize;

        for (idx, record) in reader.records().enumerate() {
            if idx < options.skip_leading_rows {
                if idx + 1 == options.skip_leading_rows {
                    let record = record.context("Failed to parse CSV header")?;
                    let mut seen = HashSet::new();
                    header = Some(
                        record
                            .iter()
                            .enumerate()
                            .map(|(pos, cell)| column_name(cell, pos, &mut seen))
                            .collect(),
                    );
                }
                continue;
            }
            match record {
                Ok(record) => rows.push(record),
                Err(err) => {
                    debug!("bad CSV record {}: {}", idx + 1, err);
                    bad_records += 1;
                }
            }
        }

        let header = match header {
            Some(header) => header,
            None => {
                let existing = self.columns(table)?;
                if existing.is_empty() {
                    bail!("CSV has no header row and table '{}' does not exist", table);
                }
                existing
            }
        };

        let (good, malformed): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.len() == header.len());
        bad_records += malformed.len();
        if bad_records > options.max_bad_records {
            bail!(
                "CSV load into '{}' failed: {} bad records exceed the limit of {}",
                table,
                bad_records,
                options.max_bad_records
            );
        }

        let column_list = header
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        let column_defs = header
            .iter()
            .map(|c| format!("\"{}\" TEXT", c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=header.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", table, column_defs),
            [],
        )
        .with_context(|| format!("Failed to create table {}", table))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({})",
                    table, column_list, placeholders
                ))
                .with_context(|| format!("Columns do not match table {}", table))?;
            for record in &good {
                stmt.execute(params_from_iter(record.iter()))?;
            }
        }
        tx.commit()?;

        info!(
            "loaded {} rows into {} ({} bad records)",
            good.len(),
            table,
            bad_records
        );
        Ok(LoadReport {
            rows_loaded: good.len(),
            bad_records,
        })
    }

    fn replace_chunks(&mut self, table: &str, chunks: &[JobChunk]) -> Result<()> {
        ensure_identifier(table)?;
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            r#"
            DROP TABLE IF EXISTS "{table}";
            CREATE TABLE "{table}" (
                seq INTEGER PRIMARY KEY,
                job_id TEXT NOT NULL,
                content TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                is_split INTEGER NOT NULL
            );
            "#
        ))
        .with_context(|| format!("Failed to recreate table {}", table))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{}\" (seq, job_id, content, chunk_size, is_split) VALUES (?1, ?2, ?3, ?4, ?5)",
                table
            ))?;
            for (seq, chunk) in chunks.iter().enumerate() {
                stmt.execute(params![
                    seq as i64,
                    chunk.job_id,
                    chunk.content,
                    chunk.chunk_size,
                    chunk.is_split
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_postings(&self, table: &str) -> Result<Vec<JobPosting>> {
        let sql = self.posting_select(table)?;
        let mut stmt = self.conn.prepare(&sql)?;
        let postings = stmt
            .query_map([], Self::row_to_posting)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read postings from {}", table))?;
        Ok(postings)
    }

    fn get_posting(&self, table: &str, job_id: &str) -> Result<Option<JobPosting>> {
        let sql = format!(
            "{} WHERE CAST(job_id AS TEXT) = ?1 LIMIT 1",
            self.posting_select(table)?
        );
        self.conn
            .query_row(&sql, params![job_id], Self::row_to_posting)
            .optional()
            .with_context(|| format!("Failed to look up posting {}", job_id))
    }

    fn fetch_chunks(&self, table: &str) -> Result<Vec<JobChunk>> {
        ensure_identifier(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT job_id, content, chunk_size, is_split FROM \"{}\" ORDER BY seq",
                table
            ))
            .with_context(|| format!("Failed to read chunk table {}", table))?;
        let chunks = stmt
            .query_map([], |row| {
                Ok(JobChunk {
                    job_id: row.get(0)?,
                    content: row.get(1)?,
                    chunk_size: row.get(2)?,
                    is_split: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn row_count(&self, table: &str) -> Result<u64> {
        ensure_identifier(table)?;
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to count rows in {}", table))?;
        Ok(count as u64)
    }
}
