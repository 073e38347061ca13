//! Query Compiler
//!
//! Maps a validated [`AnalysisPlan`] onto one of three aggregation shapes and
//! runs it against the source's SQLite table:
//! - categorical: `(dim, value)`, descending by value
//! - time: `(date, value)`, monthly buckets ascending
//! - time with breakdown: `(date, category, value)`, by bucket then category
//!
//! Identifiers are checked against the source vocabulary right before they
//! are substituted into the statement; nothing else reaches the SQL text.

use crate::error::{AnalyticsError, Result};
use crate::plan::AnalysisPlan;
use crate::sources::{is_plain_identifier, SourceDescriptor, DATE_DIMENSION};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// SQLite format string for the fixed monthly granularity.
const MONTH_FORMAT: &str = "%Y-%m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Categorical,
    Time,
    TimeBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultRow {
    Categorical { dim: String, value: f64 },
    Time { date: String, value: f64 },
    TimeBreakdown { date: String, category: String, value: f64 },
}

impl ResultRow {
    pub fn value(&self) -> f64 {
        match self {
            ResultRow::Categorical { value, .. }
            | ResultRow::Time { value, .. }
            | ResultRow::TimeBreakdown { value, .. } => *value,
        }
    }

    /// Grouping label: the dimension value or the month bucket.
    pub fn label(&self) -> &str {
        match self {
            ResultRow::Categorical { dim, .. } => dim,
            ResultRow::Time { date, .. } | ResultRow::TimeBreakdown { date, .. } => date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    pub kind: QueryKind,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub kind: QueryKind,
    pub rows: Vec<ResultRow>,

    /// Exact statement that produced `rows`
    pub query_text: String,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(ResultRow::value).sum()
    }
}

/// Build the statement for `plan` without touching storage.
pub fn compile(plan: &AnalysisPlan, source: &SourceDescriptor) -> Result<CompiledQuery> {
    let table = checked_ident(&source.table, "table")?;
    let metric = vocabulary_ident(&plan.metric, &source.metrics, "metric")?;

    if plan.dimension != DATE_DIMENSION {
        let dimension = vocabulary_ident(&plan.dimension, &source.dimensions, "dimension")?;
        let sql = format!(
            "SELECT {dim} AS dim, SUM({metric}) AS value\nFROM {table}\nGROUP BY {dim}\nORDER BY value DESC",
            dim = dimension,
            metric = metric,
            table = table,
        );
        return Ok(CompiledQuery {
            kind: QueryKind::Categorical,
            sql,
        });
    }

    let time_column = checked_ident(&source.time_column, "time column")?;
    let bucket = format!("strftime('{}', {})", MONTH_FORMAT, time_column);

    match (&source.breakdown_dimension, plan.by_time_breakdown) {
        (Some(breakdown), true) => {
            let breakdown = checked_ident(breakdown, "breakdown dimension")?;
            let sql = format!(
                "SELECT {bucket} AS date, {breakdown} AS category, SUM({metric}) AS value\nFROM {table}\nGROUP BY {bucket}, {breakdown}\nORDER BY date, category",
                bucket = bucket,
                breakdown = breakdown,
                metric = metric,
                table = table,
            );
            Ok(CompiledQuery {
                kind: QueryKind::TimeBreakdown,
                sql,
            })
        }
        _ => {
            let sql = format!(
                "SELECT {bucket} AS date, SUM({metric}) AS value\nFROM {table}\nGROUP BY {bucket}\nORDER BY date",
                bucket = bucket,
                metric = metric,
                table = table,
            );
            Ok(CompiledQuery {
                kind: QueryKind::Time,
                sql,
            })
        }
    }
}

/// Execute a compiled statement against the source table.
pub fn run(compiled: &CompiledQuery, source: &SourceDescriptor) -> Result<QueryResult> {
    info!("Executing {:?} query on '{}': {}", compiled.kind, source.id, compiled.sql);

    let rows = with_connection(source, &compiled.sql, |conn| {
        let mut stmt = conn.prepare(&compiled.sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(match compiled.kind {
                QueryKind::Categorical => ResultRow::Categorical {
                    dim: label_of(row.get_ref(0)?),
                    value: number_of(row.get_ref(1)?),
                },
                QueryKind::Time => ResultRow::Time {
                    date: label_of(row.get_ref(0)?),
                    value: number_of(row.get_ref(1)?),
                },
                QueryKind::TimeBreakdown => ResultRow::TimeBreakdown {
                    date: label_of(row.get_ref(0)?),
                    category: label_of(row.get_ref(1)?),
                    value: number_of(row.get_ref(2)?),
                },
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })?;

    debug!("Query returned {} row(s)", rows.len());
    Ok(QueryResult {
        kind: compiled.kind,
        rows,
        query_text: compiled.sql.clone(),
    })
}

pub fn compile_and_run(plan: &AnalysisPlan, source: &SourceDescriptor) -> Result<QueryResult> {
    let compiled = compile(plan, source)?;
    run(&compiled, source)
}

/// Row count and location of a source table, plus any declared columns the
/// table lacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub db_path: PathBuf,
    pub row_count: u64,
    pub columns: Vec<String>,
    pub missing_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn table_stats(source: &SourceDescriptor) -> Result<TableStats> {
    let table = checked_ident(&source.table, "table")?;
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let row_count: i64 = with_connection(source, &sql, |conn| {
        conn.query_row(&sql, [], |row| row.get(0))
    })?;

    let present: HashSet<String> = table_schema(source)?.into_iter().map(|c| c.name).collect();
    let missing_columns = source
        .columns
        .iter()
        .filter(|c| !present.contains(*c))
        .cloned()
        .collect();

    Ok(TableStats {
        table: source.table.clone(),
        db_path: source.db_path.clone(),
        row_count: row_count.max(0) as u64,
        columns: source.columns.clone(),
        missing_columns,
    })
}

pub fn table_schema(source: &SourceDescriptor) -> Result<Vec<ColumnInfo>> {
    let table = checked_ident(&source.table, "table")?;
    let sql = format!("PRAGMA table_info({})", table);
    let columns = with_connection(source, &sql, |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })?;

    if columns.is_empty() {
        return Err(AnalyticsError::query(
            format!("table '{}' not found in {:?}; run ETL first", source.table, source.db_path),
            sql,
        ));
    }
    Ok(columns)
}

/// First `limit` rows of the source table, every cell rendered as text.
pub fn preview(source: &SourceDescriptor, limit: usize) -> Result<TablePreview> {
    let table = checked_ident(&source.table, "table")?;
    let sql = format!("SELECT * FROM {} LIMIT ?1", table);
    with_connection(source, &sql, |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let rows = stmt.query_map(params![limit as i64], |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(label_of))
                .collect::<rusqlite::Result<Vec<String>>>()
        })?;
        Ok(TablePreview {
            columns,
            rows: rows.collect::<rusqlite::Result<Vec<_>>>()?,
        })
    })
}

/// Open the source database read-only for one statement. The connection is
/// dropped before this returns, on success and on failure.
fn with_connection<T, F>(source: &SourceDescriptor, sql: &str, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T>,
{
    let conn = Connection::open_with_flags(
        &source.db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        AnalyticsError::query(
            format!("cannot open {:?} ({}); run ETL first", source.db_path, e),
            sql,
        )
    })?;

    let result = f(&conn).map_err(|e| AnalyticsError::query(e, sql));
    drop(conn);
    result
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn checked_ident(name: &str, what: &str) -> Result<String> {
    if is_plain_identifier(name) {
        Ok(quote(name))
    } else {
        Err(AnalyticsError::Vocabulary(format!(
            "{} '{}' is not a plain identifier",
            what, name
        )))
    }
}

fn vocabulary_ident(name: &str, allowed: &[String], what: &str) -> Result<String> {
    if name == DATE_DIMENSION || !allowed.iter().any(|a| a == name) {
        return Err(AnalyticsError::Vocabulary(format!(
            "{} '{}' is not declared by the source (allowed: {})",
            what,
            name,
            allowed.join(", ")
        )));
    }
    checked_ident(name, what)
}

fn label_of(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn number_of(value: ValueRef<'_>) -> f64 {
    match value {
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(f) => f,
        ValueRef::Text(t) => String::from_utf8_lossy(t).trim().parse().unwrap_or(0.0),
        ValueRef::Null | ValueRef::Blob(_) => 0.0,
    }
}
