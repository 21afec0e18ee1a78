//
// error.rs
//
// Typed failures for view operations and their boundary payloads
//

use std::path::PathBuf;

use serde::Serialize;

pub type Result<T, E = ViewError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("source file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("no record with identifier '{token}'")]
    RecordNotFound { token: String },

    #[error("no view named '{name}'")]
    UnknownView { name: String },

    #[error("no column named '{name}'")]
    UnknownColumn { name: String },

    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("{}: {reason}", path.display())]
    SchemaMismatch { path: PathBuf, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("query engine error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ViewError {
    /// HTTP-style status code used when the error crosses the service boundary.
    pub fn status(&self) -> u16 {
        match self {
            ViewError::SourceNotFound { .. }
            | ViewError::RecordNotFound { .. }
            | ViewError::UnknownView { .. } => 404,
            ViewError::UnknownColumn { .. } | ViewError::InvalidPattern(_) => 400,
            ViewError::SchemaMismatch { .. } => 422,
            ViewError::Csv(_) | ViewError::Sql(_) | ViewError::Io(_) => 500,
        }
    }

    /// Short machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ViewError::SourceNotFound { .. } => "source_not_found",
            ViewError::RecordNotFound { .. } => "record_not_found",
            ViewError::UnknownView { .. } => "unknown_view",
            ViewError::UnknownColumn { .. } => "unknown_column",
            ViewError::InvalidPattern(_) => "invalid_pattern",
            ViewError::SchemaMismatch { .. } => "schema_mismatch",
            ViewError::Csv(_) => "csv",
            ViewError::Sql(_) => "query_engine",
            ViewError::Io(_) => "io",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == 404
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            status: self.status(),
            error: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured error body returned to callers instead of a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub error: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            error: "bad_request".to_string(),
            message: message.into(),
        }
    }

    /// Catch-all for failures that never reached a view (join errors and the like).
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            error: "internal".to_string(),
            message: message.into(),
        }
    }
}

impl From<&ViewError> for ErrorPayload {
    fn from(err: &ViewError) -> Self {
        err.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_maps_to_404() {
        let err = ViewError::SourceNotFound {
            path: PathBuf::from("/data/alloys.csv"),
        };
        let payload = err.to_payload();
        assert_eq!(payload.status, 404);
        assert_eq!(payload.error, "source_not_found");
        assert!(payload.message.contains("/data/alloys.csv"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_pattern_maps_to_400() {
        let err: ViewError = regex::Regex::new("(unclosed").unwrap_err().into();
        assert_eq!(err.status(), 400);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_payload_serializes_flat() {
        let payload = ErrorPayload::bad_request("missing 'view'");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"], "bad_request");
        assert_eq!(json["message"], "missing 'view'");
    }
}
