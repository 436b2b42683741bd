//! Startup enumeration of files already in the watch directory

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IngestError, Result};

/// Lists immediate children of a directory that match the file suffix
///
/// Each call to [`scan`](Self::scan) starts a fresh pass over the directory.
#[derive(Debug, Clone)]
pub struct InitialScanner {
    dir: PathBuf,
    suffix: String,
}

impl InitialScanner {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    /// Lazy iterator over matching regular files, no recursion
    pub fn scan(&self) -> Result<ScanIter> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| IngestError::directory_access(&self.dir, e))?;
        Ok(ScanIter {
            entries,
            suffix: self.suffix.clone(),
        })
    }
}

/// Iterator returned by [`InitialScanner::scan`]
#[derive(Debug)]
pub struct ScanIter {
    entries: ReadDir,
    suffix: String,
}

impl Iterator for ScanIter {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for entry in self.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            let path = entry.path();
            if !matches_suffix(&path, &self.suffix) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => return Some(path),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping entry"),
            }
        }
        None
    }
}

/// Whether the file name ends with `suffix` (case-sensitive)
pub fn matches_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.ends_with(suffix) && name.len() > suffix.len())
}
