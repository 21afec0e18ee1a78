//! Deterministic fixture table generator for benchmarks and tests.
//!
//! Generates synthetic thermoelectric-materials CSV files with a controlled
//! row count: a text `Material` column, a categorical `Family` column and a
//! configurable number of numeric property columns.
//!
//! Output is a pure function of the config, so benchmarks are reproducible.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Configuration for generating a fixture table.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub row_count: usize,
    /// Numeric columns after `Material` and `Family`; the first is always `zT`
    pub numeric_columns: usize,
    /// Every n-th row leaves its numeric cells empty (0 disables)
    pub blank_every: usize,
}

const ELEMENTS: &[&str] = &[
    "Bi", "Te", "Pb", "Se", "Sb", "Sn", "Ti", "Sr", "Mg", "Si", "Ge", "Cu", "Ag", "Zn", "Co",
];

const FAMILIES: &[&str] = &[
    "chalcogenide",
    "skutterudite",
    "half-heusler",
    "oxide",
    "clathrate",
    "silicide",
];

impl FixtureConfig {
    /// Small table: 100 rows, 3 numeric columns.
    pub fn small() -> Self {
        Self {
            row_count: 100,
            numeric_columns: 3,
            blank_every: 0,
        }
    }

    /// Medium table: 5,000 rows, 6 numeric columns, a few blank cells.
    pub fn medium() -> Self {
        Self {
            row_count: 5_000,
            numeric_columns: 6,
            blank_every: 97,
        }
    }

    /// Large table: 50,000 rows, 8 numeric columns, a few blank cells.
    pub fn large() -> Self {
        Self {
            row_count: 50_000,
            numeric_columns: 8,
            blank_every: 101,
        }
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["Material".to_string(), "Family".to_string()];
        for i in 0..self.numeric_columns {
            headers.push(match i {
                0 => "zT".to_string(),
                1 => "Temperature".to_string(),
                n => format!("prop_{}", n),
            });
        }
        headers
    }
}

/// Material name for row `index`. Unique per row: the trailing number keeps
/// element combinations from repeating.
pub fn material_name(index: usize) -> String {
    let a = ELEMENTS[index % ELEMENTS.len()];
    let b = ELEMENTS[(index / ELEMENTS.len() + 1) % ELEMENTS.len()];
    format!("{}{}{}-{}", a, (index % 3) + 1, b, index)
}

/// Generate one row of cells deterministically.
pub fn generate_row(index: usize, config: &FixtureConfig) -> Vec<String> {
    let mut row = vec![
        material_name(index),
        FAMILIES[index % FAMILIES.len()].to_string(),
    ];
    let blank = config.blank_every > 0 && index % config.blank_every == config.blank_every - 1;
    for col in 0..config.numeric_columns {
        if blank {
            row.push(String::new());
            continue;
        }
        let value = match col {
            0 => (index % 250) as f64 / 100.0,
            1 => 300.0 + (index % 600) as f64,
            n => ((index * (n + 7)) % 1000) as f64 / 10.0,
        };
        row.push(value.to_string());
    }
    row
}

/// Write a fixture table to `path`.
pub fn write_fixture_table(path: &Path, config: &FixtureConfig) {
    let mut writer = csv::Writer::from_path(path)
        .unwrap_or_else(|e| panic!("Failed to create fixture table {}: {}", path.display(), e));
    writer
        .write_record(config.headers())
        .expect("Failed to write fixture header");
    for i in 0..config.row_count {
        writer
            .write_record(generate_row(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture row {}: {}", i, e));
    }
    writer.flush().expect("Failed to flush fixture table");
}

/// Create a temporary directory holding `fixture.csv` generated from `config`.
///
/// The directory is cleaned up when the `TempDir` is dropped.
pub fn create_fixture_table(config: &FixtureConfig) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture table");
    let path = temp_dir.path().join("fixture.csv");
    write_fixture_table(&path, config);
    (temp_dir, path)
}
