//! One short-lived engine session per plan execution.
//!
//! A session owns an in-memory DuckDB connection. Upstream artifacts are
//! attached as temp views over their Parquet files so a plan node's SQL can
//! reference materialized CTEs by name whether they were rebuilt or served
//! from cache.

use crate::error::{DuckResultExt, EngineError, EngineResult};
use duckdb::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An open engine session. Dropped at the end of a plan execution.
pub struct EngineSession {
    conn: Connection,
    copies: Arc<AtomicU64>,
}

impl EngineSession {
    pub(crate) fn open(copies: Arc<AtomicU64>) -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        Ok(Self { conn, copies })
    }

    /// Execute one statement.
    pub fn execute(&self, sql: &str) -> EngineResult<usize> {
        self.conn.execute(sql, []).to_engine_err()
    }

    /// Attach a Parquet artifact as a temp view named `name`.
    pub fn attach_parquet_view(&self, name: &str, parquet: &Path) -> EngineResult<()> {
        let sql = format!(
            "CREATE OR REPLACE TEMP VIEW {} AS SELECT * FROM parquet_scan('{}')",
            name,
            escape_path(parquet)
        );
        self.execute(&sql)?;
        Ok(())
    }

    /// `COPY (select) TO 'out' (FORMAT PARQUET)`, the single write shape
    /// every artifact build goes through. Counted for single-flight tests.
    pub fn copy_to_parquet(&self, select: &str, out: &Path) -> EngineResult<()> {
        self.copies.fetch_add(1, Ordering::Relaxed);
        let sql = format!(
            "COPY ({}) TO '{}' (FORMAT PARQUET)",
            select,
            escape_path(out)
        );
        self.execute(&sql)?;
        Ok(())
    }

    /// First column of every row, coerced to strings.
    pub fn query_strings(&self, sql: &str) -> EngineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql).to_engine_err()?;
        let mut rows = stmt.query([]).to_engine_err()?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().to_engine_err()? {
            out.push(coerce_column(row, 0));
        }
        Ok(out)
    }

    /// First column of the first row, if any.
    pub fn query_one(&self, sql: &str) -> EngineResult<Option<String>> {
        let mut stmt = self.conn.prepare(sql).to_engine_err()?;
        let mut rows = stmt.query([]).to_engine_err()?;
        let Some(row) = rows.next().to_engine_err()? else {
            return Ok(None);
        };
        Ok(Some(coerce_column(row, 0)))
    }

    /// Row count of a query.
    pub fn query_count(&self, sql: &str) -> EngineResult<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM ({}) AS subq", sql), [], |row| {
                row.get(0)
            })
            .to_engine_err()?;
        Ok(count as usize)
    }

    /// Column names and types of a SELECT without running it to completion.
    pub fn describe(&self, select: &str) -> EngineResult<Vec<(String, String)>> {
        let sql = format!("DESCRIBE SELECT * FROM ({}) AS subq", select);
        let mut stmt = self.conn.prepare(&sql).to_engine_err()?;
        let mut rows = stmt.query([]).to_engine_err()?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().to_engine_err()? {
            let name: String = row.get(0).to_engine_err()?;
            let dtype: String = row.get(1).to_engine_err()?;
            columns.push((name, dtype));
        }
        Ok(columns)
    }

    /// Schema of a Parquet artifact.
    pub fn describe_parquet(&self, parquet: &Path) -> EngineResult<Vec<(String, String)>> {
        self.describe(&format!(
            "SELECT * FROM parquet_scan('{}')",
            escape_path(parquet)
        ))
    }
}

/// Coerce a column to its string rendering, trying string, integer, then
/// float before giving up with NULL.
fn coerce_column(row: &duckdb::Row<'_>, idx: usize) -> String {
    row.get::<_, String>(idx).unwrap_or_else(|_| {
        row.get::<_, i64>(idx)
            .map(|n| n.to_string())
            .unwrap_or_else(|_| {
                row.get::<_, f64>(idx)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| "NULL".to_string())
            })
    })
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
