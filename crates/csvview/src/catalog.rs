//
// catalog.rs
//
// Named views, constructed lazily from their definitions
//

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::config::{CatalogConfig, ViewConfig};
use crate::error::{Result, ViewError};
use crate::view::CsvView;

/// Owns view definitions and the views opened from them.
///
/// A view is opened the first time it is requested and then shared; its
/// CSV is read on its first operation, not here.
#[derive(Debug, Default)]
pub struct ViewCatalog {
    definitions: RwLock<IndexMap<String, ViewConfig>>,
    views: DashMap<String, Arc<CsvView>>,
    default_page_size: Option<usize>,
}

impl ViewCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog from a parsed config, discovering `data_dir` when set.
    pub fn from_config(config: CatalogConfig) -> Self {
        let catalog = Self {
            definitions: RwLock::new(config.views),
            views: DashMap::new(),
            default_page_size: Some(config.default_page_size),
        };
        if let Some(dir) = &config.data_dir {
            let added = catalog.discover(dir);
            log::info!("Discovered {} CSV views under {}", added, dir.display());
        }
        catalog
    }

    /// Add or replace a definition. An already-open view of that name is
    /// dropped so the next lookup uses the new definition.
    pub fn register(&self, config: ViewConfig) {
        let name = config.name.clone();
        self.write_definitions().insert(name.clone(), config);
        self.views.remove(&name);
    }

    /// Register a default view for every `*.csv` under `dir` that has no
    /// definition yet. The view name is the file stem. Returns how many were added.
    pub fn discover(&self, dir: &Path) -> usize {
        let mut added = 0;
        let walker = WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_csv = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if self.contains(name) {
                log::debug!("Skipping {}: view '{}' already defined", path.display(), name);
                continue;
            }
            let mut config = ViewConfig::new(name, path);
            if let Some(size) = self.default_page_size {
                config.default_page_size = size;
            }
            log::trace!("Registering discovered view '{}' -> {}", name, path.display());
            self.register(config);
            added += 1;
        }
        added
    }

    /// Shared handle to a view, opening it on first use.
    pub fn get(&self, name: &str) -> Result<Arc<CsvView>> {
        if let Some(view) = self.views.get(name) {
            return Ok(Arc::clone(view.value()));
        }
        let config = self.definition(name).ok_or_else(|| ViewError::UnknownView {
            name: name.to_string(),
        })?;
        let entry = self
            .views
            .entry(name.to_string())
            .or_try_insert_with(|| {
                log::debug!("Opening view '{}'", name);
                CsvView::open(config).map(Arc::new)
            })?;
        Ok(Arc::clone(entry.value()))
    }

    pub fn definition(&self, name: &str) -> Option<ViewConfig> {
        self.read_definitions().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_definitions().contains_key(name)
    }

    /// View names in registration order
    pub fn names(&self) -> Vec<String> {
        self.read_definitions().keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ViewConfig> {
        self.read_definitions().values().cloned().collect()
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn read_definitions(&self) -> RwLockReadGuard<'_, IndexMap<String, ViewConfig>> {
        self.definitions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_definitions(&self) -> RwLockWriteGuard<'_, IndexMap<String, ViewConfig>> {
        self.definitions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of views opened so far
    pub fn open_count(&self) -> usize {
        self.views.len()
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryRequest;

    #[test]
    fn test_unknown_view() {
        let catalog = ViewCatalog::new();
        let err = catalog.get("nope").unwrap_err();
        assert!(matches!(err, ViewError::UnknownView { .. }));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_views_are_opened_lazily_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ViewCatalog::new();
        // The file does not exist yet: registering and opening must not touch it.
        catalog.register(ViewConfig::new("te", dir.path().join("te.csv")));
        assert_eq!(catalog.open_count(), 0);

        let first = catalog.get("te").unwrap();
        let second = catalog.get("te").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.open_count(), 1);
        assert!(first.ensure_current().unwrap_err().is_not_found());
    }

    #[test]
    fn test_register_replaces_open_view() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("b.csv"), "x\n1\n2\n").unwrap();

        let catalog = ViewCatalog::new();
        catalog.register(ViewConfig::new("v", dir.path().join("a.csv")));
        let before = catalog.get("v").unwrap();
        assert_eq!(before.query(&QueryRequest::new()).unwrap().total, 1);

        catalog.register(ViewConfig::new("v", dir.path().join("b.csv")));
        let after = catalog.get("v").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.query(&QueryRequest::new()).unwrap().total, 2);
    }

    #[test]
    fn test_poisoned_definitions_still_register() {
        let catalog = Arc::new(ViewCatalog::new());
        catalog.register(ViewConfig::new("a", "a.csv"));

        let poisoner = Arc::clone(&catalog);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.definitions.write().unwrap();
            panic!("poison the definitions lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(catalog.definitions.is_poisoned());

        catalog.register(ViewConfig::new("b", "b.csv"));
        assert_eq!(catalog.names(), vec!["a", "b"]);
        assert!(catalog.contains("b"));
        assert_eq!(catalog.definition("b").unwrap().name, "b");
        assert_eq!(catalog.definitions().len(), 2);
    }

    #[test]
    fn test_discover_registers_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("alloys.csv"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("nested/te.CSV"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join(".git/hidden.csv"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "a\n1\n").unwrap();

        let catalog = ViewCatalog::new();
        catalog.register(ViewConfig::new("alloys", "/elsewhere/alloys.csv"));

        let added = catalog.discover(dir.path());
        assert_eq!(added, 1);
        assert_eq!(catalog.names(), vec!["alloys", "te"]);
        assert_eq!(
            catalog.definition("alloys").unwrap().source_path,
            std::path::PathBuf::from("/elsewhere/alloys.csv")
        );
    }

    #[test]
    fn test_from_config_applies_page_size_to_discovered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("te.csv"), "a\n1\n").unwrap();
        let mut config = CatalogConfig::new();
        config.data_dir = Some(dir.path().to_path_buf());
        config.default_page_size = 5;

        let catalog = ViewCatalog::from_config(config);
        assert_eq!(catalog.definition("te").unwrap().default_page_size, 5);
    }
}
