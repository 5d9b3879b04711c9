//! Read-only DuckDB execution sandbox.
//!
//! The sandbox is the second, independent line of defence after query
//! validation: the connection is opened with `AccessMode::ReadOnly`, so even a
//! query that slipped past the validator cannot mutate the dataset.
//!
//! Execution uses a two-query strategy. A `COUNT(*)` query reports the exact
//! match total without materialising rows, then a capped sample query fetches
//! a bounded set of matching records for display. A single `LIMIT` query could
//! not provide the exact total.

use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use duckdb::arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use duckdb::arrow::datatypes::DataType;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::array_value_to_string;
use duckdb::{AccessMode, Config, Connection};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::StoreError;

/// Row cap appended to sample queries that carry no explicit LIMIT.
pub const DEFAULT_ROW_CAP: usize = 100;

/// Open retry budget for transient write-lock contention from a concurrent
/// live-ingestion process.
const OPEN_RETRIES: u32 = 8;
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(2);

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("valid LIMIT pattern"));

/// Outcome of executing one admitted query.
#[derive(Debug)]
pub struct QueryOutcome {
    /// Exact match count from the count query, independent of the row cap.
    pub violation_count: u64,
    /// Up to `row_cap` matching records as JSON objects.
    pub samples: Vec<Value>,
}

pub struct Sandbox {
    conn: Connection,
    row_cap: usize,
}

impl Sandbox {
    /// Open the dataset read-only with the default row cap and retry budget.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, DEFAULT_ROW_CAP, OPEN_RETRIES, OPEN_RETRY_DELAY)
    }

    /// Open the dataset read-only, retrying with a fixed delay while a
    /// concurrent writer holds the file lock. Fails loudly once the retry
    /// budget is exhausted.
    pub fn open_with(
        path: &Path,
        row_cap: usize,
        retries: u32,
        delay: Duration,
    ) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::DatabaseNotFound(path.to_path_buf()));
        }
        let mut attempt = 0;
        loop {
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            match Connection::open_with_flags(path, config) {
                Ok(conn) => return Ok(Self { conn, row_cap }),
                Err(source) => {
                    attempt += 1;
                    if attempt >= retries.max(1) {
                        warn!(attempts = attempt, "read-only open failed");
                        return Err(StoreError::Locked {
                            attempts: attempt,
                            source,
                        });
                    }
                    debug!(attempt, retries, "database locked, retrying");
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Run the count query and the capped sample query for one admitted
    /// SELECT. The count query is exempt from the row cap since it returns a
    /// single scalar.
    pub fn execute(&self, sql: &str) -> Result<QueryOutcome, StoreError> {
        let violation_count = self.count_matches(sql)?;
        let samples = self.sample_matches(sql)?;
        Ok(QueryOutcome {
            violation_count,
            samples,
        })
    }

    fn count_matches(&self, sql: &str) -> Result<u64, StoreError> {
        let count_sql = count_query(sql)?;
        let mut stmt = self.conn.prepare(&count_sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0).max(0) as u64)
    }

    fn sample_matches(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        let capped = cap_rows(sql, self.row_cap);
        let mut stmt = self.conn.prepare(&capped)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(batch_to_rows(batch));
        }
        Ok(rows)
    }

    /// The underlying read-only connection, for schema resolution.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Substitute `COUNT(*)` for the column list of a SELECT.
fn count_query(sql: &str) -> Result<String, StoreError> {
    let upper = sql.to_ascii_uppercase();
    let from = upper
        .find(" FROM ")
        .ok_or_else(|| StoreError::Other("query has no FROM clause".into()))?;
    Ok(format!("SELECT COUNT(*){}", &sql[from..]))
}

/// Append a row cap unless the query already carries a LIMIT.
fn cap_rows(sql: &str, cap: usize) -> String {
    let trimmed = sql.trim_end().trim_end_matches(';');
    if LIMIT_RE.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed} LIMIT {cap}")
    }
}

fn batch_to_rows(batch: &RecordBatch) -> Vec<Value> {
    let schema = batch.schema();
    (0..batch.num_rows())
        .map(|row| {
            let mut record = serde_json::Map::with_capacity(batch.num_columns());
            for (idx, field) in schema.fields().iter().enumerate() {
                let column = batch.column(idx);
                record.insert(field.name().clone(), cell_to_json(column.as_ref(), row));
            }
            Value::Object(record)
        })
        .collect()
}

fn cell_to_json(array: &dyn Array, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Bool(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .and_then(|a| serde_json::Number::from_f64(f64::from(a.value(row))))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .and_then(|a| serde_json::Number::from_f64(a.value(row)))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        // Timestamps, decimals, etc. surface as display strings.
        _ => array_value_to_string(array, row)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
