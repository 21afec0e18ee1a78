//
// config.rs
//
// View and catalog configuration
//

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;

use crate::identity::{IdentityScheme, DEFAULT_PREFIX, DEFAULT_WIDTH};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

/// Definition of a single view over a CSV file
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    /// Unique view name within a catalog
    pub name: String,
    /// CSV file backing the view
    pub source_path: PathBuf,
    /// Raw column names to expose, in order (empty = every header column)
    pub selected_columns: Vec<String>,
    /// Raw column names matched by free-text search (empty = all selected)
    pub searchable_columns: Vec<String>,
    /// Raw column name to external key
    pub column_rename_map: IndexMap<String, String>,
    /// Row identifier scheme
    pub identity: IdentityScheme,
    /// Raw column names accepting `<col>_min` / `<col>_max` parameters
    pub range_filters: Vec<String>,
    /// Raw column names accepting comma-separated value lists
    pub categorical_filters: Vec<String>,
    /// Page size used when a request does not name one
    pub default_page_size: usize,
}

impl ViewConfig {
    /// A view exposing every column of `source_path`, all of them searchable.
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            selected_columns: Vec::new(),
            searchable_columns: Vec::new(),
            column_rename_map: IndexMap::new(),
            identity: IdentityScheme::default(),
            range_filters: Vec::new(),
            categorical_filters: Vec::new(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_searchable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rename(mut self, raw: impl Into<String>, key: impl Into<String>) -> Self {
        self.column_rename_map.insert(raw.into(), key.into());
        self
    }

    pub fn with_identity(mut self, identity: IdentityScheme) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_range_filters<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.range_filters = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_categorical_filters<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical_filters = columns.into_iter().map(Into::into).collect();
        self
    }

    /// External key for a raw column name
    pub fn external_key<'a>(&'a self, raw: &'a str) -> &'a str {
        self.column_rename_map
            .get(raw)
            .map(String::as_str)
            .unwrap_or(raw)
    }
}

/// A set of view definitions plus an optional directory of CSVs to discover
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    pub data_dir: Option<PathBuf>,
    pub default_page_size: usize,
    pub views: IndexMap<String, ViewConfig>,
}

impl CatalogConfig {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            views: IndexMap::new(),
        }
    }
}

/// Parse a catalog configuration from JSON settings.
///
/// Only keys present in `settings` are applied; everything else keeps its
/// default. Relative paths resolve against `base_dir`, normally the
/// directory holding the config file.
///
/// ```
/// use csvview::config::parse_catalog_config;
/// use serde_json::json;
///
/// let settings = json!({
///     "defaultPageSize": 50,
///     "views": {
///         "thermoelectric": {
///             "path": "te.csv",
///             "columns": ["Material", "zt"],
///             "searchable": ["Material"],
///             "rename": { "zt": "ZT" },
///             "identity": { "columns": ["Material"], "prefix": "TE", "width": 10 }
///         }
///     }
/// });
/// let cfg = parse_catalog_config(&settings, std::path::Path::new("/srv/data"));
/// let view = &cfg.views["thermoelectric"];
/// assert_eq!(view.source_path, std::path::PathBuf::from("/srv/data/te.csv"));
/// assert_eq!(view.default_page_size, 50);
/// assert_eq!(view.identity.prefix, "TE");
/// ```
pub fn parse_catalog_config(settings: &serde_json::Value, base_dir: &Path) -> CatalogConfig {
    let mut config = CatalogConfig::new();

    if let Some(v) = settings.get("dataDir").and_then(|v| v.as_str()) {
        if !v.is_empty() && !v.contains('\0') {
            config.data_dir = Some(resolve_path(base_dir, v));
        }
    }
    if let Some(v) = settings.get("defaultPageSize").and_then(|v| v.as_u64()) {
        config.default_page_size = (v as usize).clamp(1, MAX_PAGE_SIZE);
    }

    if let Some(views) = settings.get("views").and_then(|v| v.as_object()) {
        for (name, view) in views {
            match parse_view_config(name, view, base_dir, config.default_page_size) {
                Some(view_config) => {
                    config.views.insert(name.clone(), view_config);
                }
                None => log::warn!("Skipping view '{}': missing or invalid 'path'", name),
            }
        }
    }

    log::info!("Catalog configuration loaded:");
    log::info!("  data_dir: {:?}", config.data_dir);
    log::info!("  default_page_size: {}", config.default_page_size);
    for view in config.views.values() {
        log::info!(
            "  view '{}': {} ({} columns, {} searchable)",
            view.name,
            view.source_path.display(),
            view.selected_columns.len(),
            view.searchable_columns.len()
        );
    }

    config
}

fn parse_view_config(
    name: &str,
    view: &serde_json::Value,
    base_dir: &Path,
    default_page_size: usize,
) -> Option<ViewConfig> {
    let path = view
        .get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty() && !s.contains('\0'))?;

    let mut config = ViewConfig::new(name, resolve_path(base_dir, path));
    config.default_page_size = default_page_size;

    if let Some(v) = view.get("columns") {
        config.selected_columns = string_list(v);
    }
    if let Some(v) = view.get("searchable") {
        config.searchable_columns = string_list(v);
    }
    if let Some(rename) = view.get("rename").and_then(|v| v.as_object()) {
        config.column_rename_map = rename
            .iter()
            .filter_map(|(raw, key)| key.as_str().map(|k| (raw.clone(), k.to_string())))
            .collect();
    }
    if let Some(identity) = view.get("identity") {
        let columns = identity.get("columns").map(string_list).unwrap_or_default();
        let prefix = identity
            .get("prefix")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PREFIX);
        let width = identity
            .get("width")
            .and_then(|v| v.as_u64())
            .map(|w| w as usize)
            .unwrap_or(DEFAULT_WIDTH);
        config.identity = IdentityScheme::new(columns, prefix, width);
    }
    if let Some(v) = view.get("rangeFilters") {
        config.range_filters = string_list(v);
    }
    if let Some(v) = view.get("categoricalFilters") {
        config.categorical_filters = string_list(v);
    }
    if let Some(v) = view.get("defaultPageSize").and_then(|v| v.as_u64()) {
        config.default_page_size = (v as usize).clamp(1, MAX_PAGE_SIZE);
    }

    Some(config)
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Read and parse a JSON catalog file.
pub fn load_catalog_config(path: &Path) -> anyhow::Result<CatalogConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let settings: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parse_catalog_config(&settings, base_dir))
}

/// `$XDG_CONFIG_HOME/csvview/views.json`, if it exists.
#[cfg(unix)]
pub fn default_config_path() -> Option<PathBuf> {
    xdg::BaseDirectories::with_prefix("csvview")
        .ok()?
        .find_config_file("views.json")
}

#[cfg(not(unix))]
pub fn default_config_path() -> Option<PathBuf> {
    None
}
