// lib.rs - Cached, queryable views over CSV files.
//
// Each view mirrors one CSV file into an in-memory SQLite table, rebuilt
// whenever the file's modification time or size changes, and serves
// paginated, filtered queries and identifier lookups against it.
//
// The binary entry point lives in main.rs.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod perf;
pub mod query;
pub mod service;
pub mod snapshot;
pub mod view;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;


pub use catalog::ViewCatalog;
pub use config::{CatalogConfig, ViewConfig};
pub use error::{ErrorPayload, Result, ViewError};
pub use identity::{compute_row_identifier, IdentityScheme};
pub use query::{Filter, QueryRequest};
pub use view::{CsvView, QueryResult, Row, ViewRevision, ViewStats};
