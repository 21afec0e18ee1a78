//
// snapshot.rs
//
// Source file change detection for views
//

use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use serde::Serialize;

use crate::error::{Result, ViewError};

/// Snapshot metadata for a source file, used to decide whether a view is stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileSnapshot {
    /// File modification time (from filesystem metadata)
    pub mtime: SystemTime,
    /// File size in bytes
    pub size: u64,
}

impl FileSnapshot {
    /// Create snapshot from filesystem metadata
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
        }
    }

    /// Check if this snapshot matches current disk state
    pub fn matches_disk(&self, current: &FileSnapshot) -> bool {
        self.mtime == current.mtime && self.size == current.size
    }
}

/// Stat `path` and build a snapshot. A missing path or a non-file is
/// `SourceNotFound`; other stat failures are `Io`.
pub fn get_file_snapshot(path: &Path) -> Result<FileSnapshot> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(FileSnapshot::from_metadata(&metadata)),
        Ok(_) => Err(ViewError::SourceNotFound {
            path: path.to_path_buf(),
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(ViewError::SourceNotFound {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(ViewError::Io(err)),
    }
}
