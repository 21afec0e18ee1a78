//
// view.rs
//
// A CSV file exposed as a cached, queryable view
//

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::ViewConfig;
use crate::engine::{self, quote_ident, ColumnInfo, ColumnKind, ROW_ORDER, TABLE};
use crate::error::{Result, ViewError};
use crate::identity::IdentityScheme;
use crate::perf::{self, TimingGuard};
use crate::query::{build_predicate, resolve_column, QueryRequest};
use crate::snapshot::{get_file_snapshot, FileSnapshot};

/// Rebuilds slower than this are flagged in verbose perf mode
const REBUILD_WARN_MS: u64 = 500;

/// Keys every serialized row carries besides its fields
const RESERVED_KEYS: [&str; 2] = ["_id", "_index"];

/// One result row, keyed by external column names
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Stable content-hash identifier
    #[serde(rename = "_id")]
    pub id: String,
    /// 1-based position under the filter that produced this row
    #[serde(rename = "_index")]
    pub index: u64,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub items: Vec<Row>,
    /// Rows matching the filter, before pagination
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// What `ensure_current` observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewRevision {
    /// Incremented once per rebuild; 0 means never loaded
    pub revision: u64,
    pub row_count: usize,
    pub snapshot: FileSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewStats {
    pub name: String,
    pub source_path: PathBuf,
    pub revision: u64,
    pub row_count: usize,
    pub last_rebuild_ms: Option<f64>,
    pub snapshot: Option<FileSnapshot>,
}

/// Mutable state guarded by the view's lock
struct ViewState {
    conn: Connection,
    snapshot: Option<FileSnapshot>,
    revision: u64,
    row_count: usize,
    columns: Vec<ColumnInfo>,
    /// Positions within `columns` hashed for row identifiers, in scheme order
    identity_indices: Vec<usize>,
    last_rebuild: Option<Duration>,
}

/// CSV file exposed as a queryable table.
///
/// The view owns one in-memory SQLite connection. Every operation stats the
/// source file first and rebuilds the table when the file changed, all under
/// the same lock, so a query never sees a half-replaced table.
pub struct CsvView {
    config: ViewConfig,
    state: Mutex<ViewState>,
}

impl std::fmt::Debug for CsvView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvView")
            .field("name", &self.config.name)
            .field("source_path", &self.config.source_path)
            .finish_non_exhaustive()
    }
}

impl CsvView {
    /// Create the view. The CSV is not read until the first operation.
    pub fn open(config: ViewConfig) -> Result<Self> {
        let conn = engine::open_connection()?;
        Ok(Self {
            config,
            state: Mutex::new(ViewState {
                conn,
                snapshot: None,
                revision: 0,
                row_count: 0,
                columns: Vec::new(),
                identity_indices: Vec::new(),
                last_rebuild: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn source_path(&self) -> &Path {
        &self.config.source_path
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityScheme {
        &self.config.identity
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure the backing table reflects the file on disk.
    ///
    /// Idempotent: with no file change the revision stays the same.
    pub fn ensure_current(&self) -> Result<(PathBuf, ViewRevision)> {
        let mut state = self.lock();
        let snapshot = self.refresh(&mut state)?;
        Ok((
            self.config.source_path.clone(),
            ViewRevision {
                revision: state.revision,
                row_count: state.row_count,
                snapshot,
            },
        ))
    }

    fn refresh(&self, state: &mut ViewState) -> Result<FileSnapshot> {
        let current = get_file_snapshot(&self.config.source_path)?;
        if let Some(cached) = &state.snapshot {
            if cached.matches_disk(&current) {
                log::trace!("View '{}' is current (revision {})", self.config.name, state.revision);
                return Ok(current);
            }
            log::debug!("View '{}' is stale; rebuilding", self.config.name);
        }
        self.rebuild(state, current)?;
        Ok(current)
    }

    /// Replace the table wholesale. The snapshot is taken before the file is
    /// read, so a write racing the read shows up as staleness next time.
    fn rebuild(&self, state: &mut ViewState, snapshot: FileSnapshot) -> Result<()> {
        let _guard = TimingGuard::with_threshold("view:rebuild", REBUILD_WARN_MS);
        let start = Instant::now();

        let table = engine::read_csv(&self.config.source_path, &self.config.selected_columns)?;

        let searchable = if self.config.searchable_columns.is_empty() {
            table.columns.clone()
        } else {
            self.config.searchable_columns.clone()
        };
        for column in &searchable {
            if table.column_index(column).is_none() {
                return Err(self.schema_error(format!(
                    "searchable column '{}' is not selected",
                    column
                )));
            }
        }

        let identity_indices: Vec<usize> = if self.config.identity.columns.is_empty() {
            (0..table.columns.len()).collect()
        } else {
            self.config
                .identity
                .columns
                .iter()
                .map(|c| {
                    table.column_index(c).ok_or_else(|| {
                        self.schema_error(format!("identity column '{}' is not selected", c))
                    })
                })
                .collect::<Result<_>>()?
        };

        let columns: Vec<ColumnInfo> = table
            .columns
            .iter()
            .zip(&table.kinds)
            .enumerate()
            .map(|(position, (name, kind))| ColumnInfo {
                name: name.clone(),
                key: self.config.external_key(name).to_string(),
                kind: *kind,
                searchable: searchable.contains(name),
                position,
            })
            .collect();
        self.check_external_keys(&columns)?;

        engine::load_table(&mut state.conn, &table)?;

        state.columns = columns;
        state.identity_indices = identity_indices;
        state.row_count = table.rows.len();
        state.snapshot = Some(snapshot);
        state.revision += 1;

        let elapsed = start.elapsed();
        state.last_rebuild = Some(elapsed);
        perf::record_rebuild(elapsed, table.rows.len());
        log::info!(
            "Rebuilt view '{}' from {} ({} rows, {} columns) in {:?} [revision {}]",
            self.config.name,
            self.config.source_path.display(),
            table.rows.len(),
            table.columns.len(),
            elapsed,
            state.revision
        );
        Ok(())
    }

    /// Every external key must be distinct and must not shadow `_id` or `_index`.
    fn check_external_keys(&self, columns: &[ColumnInfo]) -> Result<()> {
        let mut seen = std::collections::HashMap::new();
        for column in columns {
            if RESERVED_KEYS.contains(&column.key.as_str()) {
                return Err(self.schema_error(format!(
                    "column '{}' maps to reserved key '{}'",
                    column.name, column.key
                )));
            }
            if let Some(other) = seen.insert(column.key.as_str(), column.name.as_str()) {
                return Err(self.schema_error(format!(
                    "columns '{}' and '{}' both map to key '{}'",
                    other, column.name, column.key
                )));
            }
        }
        Ok(())
    }

    fn schema_error(&self, reason: String) -> ViewError {
        ViewError::SchemaMismatch {
            path: self.config.source_path.clone(),
            reason,
        }
    }

    /// Filtered, paginated query in natural (file) order.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let request = request.normalized();
        if request.use_regex {
            if let Some(text) = request.search_text() {
                engine::compile_pattern(text)?;
            }
        }

        let mut state = self.lock();
        self.refresh(&mut state)?;
        let start = Instant::now();

        let predicate = build_predicate(&request, &state.columns);
        let table = quote_ident(TABLE);

        let total: i64 = state.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}{}", table, predicate.where_sql),
            rusqlite::params_from_iter(predicate.params.iter()),
            |row| row.get(0),
        )?;
        let total = total.max(0) as u64;

        let offset = request.offset();
        let mut items = Vec::new();
        if offset < total {
            let mut params = predicate.params.clone();
            params.push(Value::Integer(request.page_size as i64));
            params.push(Value::Integer(offset.min(i64::MAX as u64) as i64));
            let sql = format!(
                "SELECT {} FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
                self.select_list(&state),
                table,
                predicate.where_sql,
                quote_ident(ROW_ORDER)
            );
            let raw_rows = fetch_rows(&state.conn, &sql, &params, state.columns.len())?;
            items = raw_rows
                .iter()
                .enumerate()
                .map(|(i, values)| self.materialize(&state, values, offset + i as u64 + 1))
                .collect();
        }

        perf::record_query(start.elapsed());
        log::trace!(
            "Query on '{}' matched {} rows, returning {} (page {}, size {})",
            self.config.name,
            total,
            items.len(),
            request.page,
            request.page_size
        );

        Ok(QueryResult {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        })
    }

    /// Find the first row whose identifier equals `token`.
    ///
    /// This is a linear scan with no index: fine for tables up to roughly
    /// 100k rows, not beyond.
    pub fn resolve_by_identifier(&self, token: &str) -> Result<Row> {
        let not_found = || ViewError::RecordNotFound {
            token: token.trim().to_string(),
        };
        let wanted = self.config.identity.normalize_token(token).ok_or_else(not_found)?;

        let mut state = self.lock();
        self.refresh(&mut state)?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            self.select_list(&state),
            quote_ident(TABLE),
            quote_ident(ROW_ORDER)
        );
        let rows = fetch_rows(&state.conn, &sql, &[], state.columns.len())?;

        let scheme = &self.config.identity;
        let indices = &state.identity_indices;
        let position = rows
            .par_iter()
            .position_first(|values| identify(scheme, indices, values) == wanted)
            .ok_or_else(not_found)?;

        Ok(self.materialize(&state, &rows[position], position as u64 + 1))
    }

    /// Identifier for a row given as raw values in selected-column order.
    pub fn compute_row_identifier(&self, values: &[Option<String>]) -> Result<String> {
        let mut state = self.lock();
        self.refresh(&mut state)?;
        Ok(identify(&self.config.identity, &state.identity_indices, values))
    }

    /// Selected columns with their kinds and external keys.
    pub fn columns(&self) -> Result<Vec<ColumnInfo>> {
        let mut state = self.lock();
        self.refresh(&mut state)?;
        Ok(state.columns.clone())
    }

    /// Sorted distinct non-empty values of a column (raw name or external key).
    pub fn distinct_values(&self, column: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        self.refresh(&mut state)?;
        let info = resolve_column(&state.columns, column).ok_or_else(|| {
            ViewError::UnknownColumn {
                name: column.to_string(),
            }
        })?;
        let ident = info.ident();
        let order = match info.kind {
            ColumnKind::Number => format!("as_number({})", ident),
            ColumnKind::Text => ident.clone(),
        };
        let sql = format!(
            "SELECT DISTINCT {ident} FROM {} WHERE {ident} IS NOT NULL ORDER BY {order}",
            quote_ident(TABLE)
        );
        let mut stmt = state.conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    /// Min and max of a numeric column; `None` for text or all-empty columns.
    pub fn numeric_bounds(&self, column: &str) -> Result<Option<(f64, f64)>> {
        let mut state = self.lock();
        self.refresh(&mut state)?;
        let info = resolve_column(&state.columns, column).ok_or_else(|| {
            ViewError::UnknownColumn {
                name: column.to_string(),
            }
        })?;
        if info.kind != ColumnKind::Number {
            return Ok(None);
        }
        // Extremes come back as raw cell text and are parsed here.
        let ident = info.ident();
        let extreme = |dir: &str| {
            format!(
                "(SELECT {ident} FROM {} WHERE {ident} IS NOT NULL ORDER BY as_number({ident}) {dir} LIMIT 1)",
                quote_ident(TABLE)
            )
        };
        let sql = format!("SELECT {}, {}", extreme("ASC"), extreme("DESC"));
        let (min, max): (Option<String>, Option<String>) =
            state.conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let min = min.as_deref().and_then(engine::parse_number);
        let max = max.as_deref().and_then(engine::parse_number);
        Ok(min.zip(max))
    }

    /// Counters for this view. Does not touch the source file.
    pub fn stats(&self) -> ViewStats {
        let state = self.lock();
        ViewStats {
            name: self.config.name.clone(),
            source_path: self.config.source_path.clone(),
            revision: state.revision,
            row_count: state.row_count,
            last_rebuild_ms: state.last_rebuild.map(|d| d.as_secs_f64() * 1000.0),
            snapshot: state.snapshot,
        }
    }

    fn select_list(&self, state: &ViewState) -> String {
        state
            .columns
            .iter()
            .map(ColumnInfo::ident)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn materialize(&self, state: &ViewState, values: &[Option<String>], index: u64) -> Row {
        let fields = state
            .columns
            .iter()
            .zip(values)
            .map(|(column, raw)| {
                (
                    column.key.clone(),
                    engine::typed_value(column.kind, raw.as_deref()),
                )
            })
            .collect();
        Row {
            id: identify(&self.config.identity, &state.identity_indices, values),
            index,
            fields,
        }
    }
}

fn identify(scheme: &IdentityScheme, indices: &[usize], values: &[Option<String>]) -> String {
    let tracked: Vec<Option<&str>> = indices
        .iter()
        .map(|&i| values.get(i).and_then(|v| v.as_deref()))
        .collect();
    scheme.compute(&tracked)
}

fn fetch_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    width: usize,
) -> Result<Vec<Vec<Option<String>>>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(engine::value_to_text))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
