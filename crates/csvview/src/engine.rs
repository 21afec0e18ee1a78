//
// engine.rs
//
// Embedded query engine plumbing: CSV ingestion and SQLite table loading
//

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use regex::{Regex, RegexBuilder};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Result, ViewError};

/// Name of the backing table inside each view's connection
pub const TABLE: &str = "view_rows";

/// Explicit insertion-order key of the backing table. Data columns are stored
/// under positional names (`c0`, `c1`, ...), so no header can shadow it.
pub const ROW_ORDER: &str = "row_seq";

/// Compiled patterns kept per connection for the `regexp` SQL function
const REGEX_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(32) {
    Some(n) => n,
    None => panic!("regex cache capacity must be non-zero"),
};

/// Inferred type of a CSV column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Free text, compared and returned as strings
    #[default]
    Text,
    /// Every non-empty cell parses as a finite number
    Number,
}

/// A column as exposed by a view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Raw header name in the CSV file
    pub name: String,
    /// External key used in query results
    pub key: String,
    pub kind: ColumnKind,
    pub searchable: bool,
    /// Position within the selected columns, which names the SQL column
    #[serde(skip)]
    pub position: usize,
}

impl ColumnInfo {
    /// Quoted SQL identifier of the backing column
    pub fn ident(&self) -> String {
        column_ident(self.position)
    }
}

/// Quoted positional SQL name of the `position`-th selected column.
pub fn column_ident(position: usize) -> String {
    quote_ident(&format!("c{}", position))
}

/// Projected CSV contents ready to be loaded into the engine
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub columns: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    /// Raw cell text; empty cells are `None`
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Open an in-memory connection with the `regexp`, `contains_text` and
/// `as_number` functions registered.
pub fn open_connection() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    register_regexp(&conn)?;
    register_contains_text(&conn)?;
    register_as_number(&conn)?;
    Ok(conn)
}

/// Build the case-insensitive regex used for regex-mode search.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Register `regexp(pattern, value)`, so `value REGEXP pattern` also works.
///
/// Matching is case-insensitive and NULL values never match.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    let cache: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(REGEX_CACHE_CAPACITY));
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let value: Option<String> = ctx.get(1)?;
            let Some(value) = value else {
                return Ok(false);
            };

            let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(re) = guard.get(&pattern) {
                return Ok(re.is_match(&value));
            }
            let re = compile_pattern(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let matched = re.is_match(&value);
            guard.put(pattern, re);
            Ok(matched)
        },
    )
}

/// Literal substring test that ignores case across all of Unicode.
pub fn contains_text(value: &str, needle: &str) -> bool {
    value.to_lowercase().contains(&needle.to_lowercase())
}

/// Register `contains_text(needle, value)` for free-text search.
///
/// The needle is literal (no wildcards) and NULL values never match.
fn register_contains_text(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "contains_text",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let needle: String = ctx.get(0)?;
            let value: Option<String> = ctx.get(1)?;
            Ok(value.is_some_and(|v| contains_text(&v, &needle)))
        },
    )
}

/// Register `as_number(value)`: the cell as a finite float, NULL otherwise.
/// Comparisons against NULL are false, so placeholders like `N/A` drop out
/// of range filters.
fn register_as_number(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "as_number",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.as_deref().and_then(parse_number))
        },
    )
}

/// Quote an identifier for SQL (`"` doubled).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read `path` and project it onto `selected` (empty = every header column).
///
/// Short rows are padded with NULL and long rows truncated, so ragged files
/// still load. A selected column missing from the header is a schema error.
pub fn read_csv(path: &Path, selected: &[String]) -> Result<CsvTable> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            ViewError::SourceNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ViewError::Io(err)
        }
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(schema_error(path, "file has no header row"));
    }

    let columns: Vec<String> = if selected.is_empty() {
        headers.clone()
    } else {
        selected.to_vec()
    };

    let mut seen = HashSet::new();
    for column in &columns {
        if !seen.insert(column.as_str()) {
            return Err(schema_error(path, &format!("duplicate column '{}'", column)));
        }
    }

    let projection: Vec<usize> = columns
        .iter()
        .map(|c| {
            headers
                .iter()
                .position(|h| h == c)
                .ok_or_else(|| schema_error(path, &format!("column '{}' not in header", c)))
        })
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Option<String>> = projection
            .iter()
            .map(|&i| record.get(i).filter(|v| !v.is_empty()).map(str::to_string))
            .collect();
        rows.push(row);
    }

    let kinds = (0..columns.len())
        .map(|col| infer_kind(rows.iter().map(|r| r[col].as_deref())))
        .collect();

    Ok(CsvTable {
        columns,
        kinds,
        rows,
    })
}

fn schema_error(path: &Path, reason: &str) -> ViewError {
    ViewError::SchemaMismatch {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// A column is numeric when it has at least one value and every value parses
/// as a finite float.
pub fn infer_kind<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ColumnKind {
    let mut any = false;
    for value in values.flatten() {
        any = true;
        if parse_number(value).is_none() {
            return ColumnKind::Text;
        }
    }
    if any {
        ColumnKind::Number
    } else {
        ColumnKind::Text
    }
}

/// Lenient finite float parse shared by kind inference and range bounds.
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Replace the backing table with `table`'s contents in one transaction.
///
/// Columns are stored positionally after the `ROW_ORDER` key, which follows
/// file order. On error the transaction rolls back and the previous table
/// stays intact.
pub fn load_table(conn: &mut Connection, table: &CsvTable) -> Result<()> {
    let name = quote_ident(TABLE);
    let idents: Vec<String> = (0..table.columns.len()).map(column_ident).collect();
    let column_defs: Vec<String> =
        std::iter::once(format!("{} INTEGER PRIMARY KEY", quote_ident(ROW_ORDER)))
            .chain(idents.iter().map(|c| format!("{} TEXT", c)))
            .collect();
    let placeholders = vec!["?"; table.columns.len()].join(", ");

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({});",
        column_defs.join(", ")
    ))?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {name} ({}) VALUES ({placeholders})",
            idents.join(", ")
        ))?;
        for row in &table.rows {
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Cell text as stored; numbers that SQLite produced itself are formatted back.
pub fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// JSON value for a raw cell, typed by its column kind.
pub fn typed_value(kind: ColumnKind, raw: Option<&str>) -> serde_json::Value {
    let Some(raw) = raw else {
        return serde_json::Value::Null;
    };
    if kind == ColumnKind::Number {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return serde_json::Value::from(i);
        }
        if let Some(n) = parse_number(trimmed).and_then(serde_json::Number::from_f64) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(raw.to_string())
}
