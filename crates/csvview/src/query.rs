//
// query.rs
//
// Query requests, parameter parsing and predicate construction
//

use std::collections::HashMap;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::config::{ViewConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::engine::{parse_number, ColumnInfo};

/// Structured per-column constraint, AND-combined with free-text search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    /// Numeric range; bounds stay raw text and unparseable ones are ignored
    Range {
        column: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Exact match against any of `values`; an empty list constrains nothing
    Categorical { column: String, values: Vec<String> },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Range { column, .. } | Filter::Categorical { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub free_text: Option<String>,
    pub use_regex: bool,
    pub page: u64,
    pub page_size: u64,
    pub filters: Vec<Filter>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            free_text: None,
            use_regex: false,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE as u64,
            filters: Vec::new(),
        }
    }
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }

    pub fn regex(mut self, use_regex: bool) -> Self {
        self.use_regex = use_regex;
        self
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Copy with `page >= 1` and `page_size` within `[1, MAX_PAGE_SIZE]`.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.page = self.page.max(1);
        out.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE as u64);
        out
    }

    /// Trimmed search text, `None` when blank.
    pub fn search_text(&self) -> Option<&str> {
        self.free_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Row offset of the first item on the requested page.
    pub fn offset(&self) -> u64 {
        let normalized = self.normalized();
        (normalized.page - 1).saturating_mul(normalized.page_size)
    }

    /// Build a request from flat string parameters, as a query string supplies them.
    ///
    /// Recognised keys: `q`, `regex`, `page`, `page_size`, `<key>_min` and
    /// `<key>_max` for the view's range columns, and `<key>` (comma-separated)
    /// for its categorical columns, where `<key>` is the column's external key.
    /// Non-numeric paging values fall back to defaults.
    pub fn from_params(params: &HashMap<String, String>, config: &ViewConfig) -> Self {
        let mut request = QueryRequest {
            page_size: config.default_page_size as u64,
            ..QueryRequest::default()
        };

        request.free_text = params
            .get("q")
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        request.use_regex = params
            .get("regex")
            .map(|v| parse_flag(v))
            .unwrap_or(false);
        if let Some(page) = params.get("page").and_then(|v| parse_count(v)) {
            request.page = page;
        }
        if let Some(size) = params.get("page_size").and_then(|v| parse_count(v)) {
            request.page_size = size;
        }

        for raw in &config.range_filters {
            let key = config.external_key(raw);
            let min = non_blank(params.get(&format!("{}_min", key)));
            let max = non_blank(params.get(&format!("{}_max", key)));
            if min.is_some() || max.is_some() {
                request.filters.push(Filter::Range {
                    column: raw.clone(),
                    min,
                    max,
                });
            }
        }
        for raw in &config.categorical_filters {
            let key = config.external_key(raw);
            if let Some(list) = params.get(key) {
                let values: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
                if !values.is_empty() {
                    request.filters.push(Filter::Categorical {
                        column: raw.clone(),
                        values,
                    });
                }
            }
        }

        request.normalized()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Paging numbers accept negatives and zero (clamped later) but not junk.
fn parse_count(value: &str) -> Option<u64> {
    let n: i64 = value.trim().parse().ok()?;
    Some(n.max(0) as u64)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// SQL `WHERE` fragment plus its positional parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    /// Either empty or ` WHERE ...`
    pub where_sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.where_sql.is_empty()
    }
}

/// Find a column by raw name or external key.
pub fn resolve_column<'a>(columns: &'a [ColumnInfo], name: &str) -> Option<&'a ColumnInfo> {
    columns
        .iter()
        .find(|c| c.name == name)
        .or_else(|| columns.iter().find(|c| c.key == name))
}

/// Combine free-text search (OR across searchable columns) with structured
/// filters (AND). Only columns in `columns` are referenced; all values are
/// bound parameters.
///
/// Substring search is literal and ignores case across Unicode. A range
/// filter only keeps cells that parse as numbers, whatever the column kind.
/// Filters on unknown columns and bounds that are not finite numbers are
/// dropped rather than rejected.
pub fn build_predicate(request: &QueryRequest, columns: &[ColumnInfo]) -> Predicate {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(text) = request.search_text() {
        let searchable: Vec<&ColumnInfo> = columns.iter().filter(|c| c.searchable).collect();
        if searchable.is_empty() {
            clauses.push("0".to_string());
        } else {
            let mut alternatives = Vec::with_capacity(searchable.len());
            for column in searchable {
                let function = if request.use_regex {
                    "regexp"
                } else {
                    "contains_text"
                };
                alternatives.push(format!("{}(?, {})", function, column.ident()));
                params.push(Value::Text(text.to_string()));
            }
            clauses.push(format!("({})", alternatives.join(" OR ")));
        }
    }

    for filter in &request.filters {
        let Some(column) = resolve_column(columns, filter.column()) else {
            log::debug!("Ignoring filter on unknown column '{}'", filter.column());
            continue;
        };
        let ident = column.ident();
        match filter {
            Filter::Range { min, max, .. } => {
                for (bound, op) in [(min, ">="), (max, "<=")] {
                    let Some(raw) = bound else {
                        continue;
                    };
                    match parse_number(raw) {
                        Some(value) => {
                            clauses.push(format!("as_number({}) {} ?", ident, op));
                            params.push(Value::Real(value));
                        }
                        None => {
                            log::debug!(
                                "Ignoring malformed bound '{}' for column '{}'",
                                raw,
                                column.name
                            );
                        }
                    }
                }
            }
            Filter::Categorical { values, .. } => {
                let values: Vec<&String> = values.iter().filter(|v| !v.is_empty()).collect();
                if values.is_empty() {
                    continue;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                clauses.push(format!("{} IN ({})", ident, placeholders));
                params.extend(values.into_iter().map(|v| Value::Text(v.clone())));
            }
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Predicate { where_sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ColumnKind;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "Material".into(),
                key: "material".into(),
                kind: ColumnKind::Text,
                searchable: true,
                position: 0,
            },
            ColumnInfo {
                name: "Formula".into(),
                key: "Formula".into(),
                kind: ColumnKind::Text,
                searchable: true,
                position: 1,
            },
            ColumnInfo {
                name: "zt".into(),
                key: "ZT".into(),
                kind: ColumnKind::Number,
                searchable: false,
                position: 2,
            },
        ]
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_normalized_clamps() {
        let request = QueryRequest::new().page(0, 0).normalized();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 1);

        let request = QueryRequest::new().page(3, 10_000).normalized();
        assert_eq!(request.page, 3);
        assert_eq!(request.page_size, 200);
    }

    #[test]
    fn test_offset() {
        assert_eq!(QueryRequest::new().page(1, 20).offset(), 0);
        assert_eq!(QueryRequest::new().page(3, 20).offset(), 40);
        assert_eq!(QueryRequest::new().page(0, 20).offset(), 0);
    }

    #[test]
    fn test_blank_search_is_absent() {
        let request = QueryRequest::new().search("   ");
        assert!(request.search_text().is_none());
        assert!(build_predicate(&request, &columns()).is_empty());
    }

    #[test]
    fn test_substring_search_or_combined() {
        let request = QueryRequest::new().search(" 50%_Ti ");
        let predicate = build_predicate(&request, &columns());
        assert_eq!(
            predicate.where_sql,
            " WHERE (contains_text(?, \"c0\") OR contains_text(?, \"c1\"))"
        );
        assert_eq!(predicate.params.len(), 2);
        assert_eq!(predicate.params[0], Value::Text("50%_Ti".into()));
    }

    #[test]
    fn test_regex_search() {
        let request = QueryRequest::new().search("^ti").regex(true);
        let predicate = build_predicate(&request, &columns());
        assert!(predicate.where_sql.contains("regexp(?, \"c0\")"));
        assert_eq!(predicate.params[0], Value::Text("^ti".into()));
    }

    #[test]
    fn test_range_filter_by_external_key() {
        let request = QueryRequest::new().filter(Filter::Range {
            column: "ZT".into(),
            min: Some("0.5".into()),
            max: Some("1.5".into()),
        });
        let predicate = build_predicate(&request, &columns());
        assert_eq!(
            predicate.where_sql,
            " WHERE as_number(\"c2\") >= ? AND as_number(\"c2\") <= ?"
        );
        assert_eq!(predicate.params, vec![Value::Real(0.5), Value::Real(1.5)]);
    }

    #[test]
    fn test_malformed_bounds_are_ignored() {
        let request = QueryRequest::new().filter(Filter::Range {
            column: "zt".into(),
            min: Some("abc".into()),
            max: Some("NaN".into()),
        });
        assert!(build_predicate(&request, &columns()).is_empty());
    }

    #[test]
    fn test_unknown_column_filters_are_ignored() {
        let request = QueryRequest::new().filter(Filter::Range {
            column: "nope".into(),
            min: Some("1".into()),
            max: None,
        });
        assert!(build_predicate(&request, &columns()).is_empty());
    }

    #[test]
    fn test_range_filter_applies_to_text_columns() {
        let request = QueryRequest::new().filter(Filter::Range {
            column: "Material".into(),
            min: Some("1000".into()),
            max: None,
        });
        let predicate = build_predicate(&request, &columns());
        assert_eq!(predicate.where_sql, " WHERE as_number(\"c0\") >= ?");
        assert_eq!(predicate.params, vec![Value::Real(1000.0)]);
    }

    #[test]
    fn test_categorical_filter_and_search_are_and_combined() {
        let request = QueryRequest::new()
            .search("Ti")
            .filter(Filter::Categorical {
                column: "Material".into(),
                values: vec!["TiO2".into(), "".into(), "TiN".into()],
            });
        let predicate = build_predicate(&request, &columns());
        assert!(predicate.where_sql.ends_with(" AND \"c0\" IN (?, ?)"));
        assert_eq!(predicate.params.len(), 4);
    }

    #[test]
    fn test_from_params() {
        let config = ViewConfig::new("te", "te.csv")
            .with_rename("zt", "ZT")
            .with_range_filters(["zt"])
            .with_categorical_filters(["Material"]);
        let request = QueryRequest::from_params(
            &params(&[
                ("q", " Ti "),
                ("regex", "true"),
                ("page", "2"),
                ("page_size", "500"),
                ("ZT_min", "0.3"),
                ("ZT_max", "oops"),
                ("Material", "TiO2, TiN,"),
            ]),
            &config,
        );
        assert_eq!(request.free_text.as_deref(), Some("Ti"));
        assert!(request.use_regex);
        assert_eq!(request.page, 2);
        assert_eq!(request.page_size, 200);
        assert_eq!(
            request.filters,
            vec![
                Filter::Range {
                    column: "zt".into(),
                    min: Some("0.3".into()),
                    max: Some("oops".into()),
                },
                Filter::Categorical {
                    column: "Material".into(),
                    values: vec!["TiO2".into(), "TiN".into()],
                },
            ]
        );
    }

    #[test]
    fn test_from_params_bad_paging_uses_defaults() {
        let config = ViewConfig::new("te", "te.csv");
        let request =
            QueryRequest::from_params(&params(&[("page", "x"), ("page_size", "-5")]), &config);
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 1);

        let request = QueryRequest::from_params(&params(&[("page_size", "ten")]), &config);
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE as u64);
    }
}
