//! Ingestion error taxonomy
//!
//! Per-file errors (`MalformedFile`, `FileVanished`, `Load`, `Archive`,
//! `AlreadyInProgress`, per-file `Io`) are caught at the pipeline boundary and
//! never stop the watcher. The rest surface during startup and end the process.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Watch or archive directory missing, unreadable, or not watchable
    #[error("Cannot access directory '{}': {reason}", path.display())]
    DirectoryAccess { path: PathBuf, reason: String },

    /// File content is not a well-formed delimited file for the target table
    #[error("Malformed file '{}': {reason}", path.display())]
    MalformedFile { path: PathBuf, reason: String },

    /// File disappeared between discovery and processing
    #[error("File vanished before it could be processed: {}", path.display())]
    FileVanished { path: PathBuf },

    /// Bulk insert failed; the transaction was rolled back
    #[error("Failed to load rows into '{table}': {reason}")]
    Load { table: String, reason: String },

    /// File could not be moved out of the watch directory
    #[error("Failed to archive '{}' to '{}': {reason}", path.display(), destination.display())]
    Archive {
        path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// Another worker is already processing this path
    #[error("File is already being processed: {}", path.display())]
    AlreadyInProgress { path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn directory_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DirectoryAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn load(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn archive(
        path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        Self::Archive {
            path: path.into(),
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly label used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DirectoryAccess { .. } => "directory_access",
            Self::MalformedFile { .. } => "malformed_file",
            Self::FileVanished { .. } => "file_vanished",
            Self::Load { .. } => "load",
            Self::Archive { .. } => "archive",
            Self::AlreadyInProgress { .. } => "already_in_progress",
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Migration(_) => "migration",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(IngestError::malformed("a.csv", "bad").kind(), "malformed_file");
        assert_eq!(IngestError::load("students", "constraint").kind(), "load");
        assert_eq!(
            IngestError::archive("a.csv", "archive/a.csv", "exists").kind(),
            "archive"
        );
        assert_eq!(
            IngestError::FileVanished { path: "a.csv".into() }.kind(),
            "file_vanished"
        );
        assert_eq!(
            IngestError::directory_access("/missing", "not found").kind(),
            "directory_access"
        );
        assert_eq!(IngestError::Config("empty table".into()).kind(), "config");
    }

    #[test]
    fn test_messages_carry_file_identity() {
        let err = IngestError::malformed("dropbox/report.csv", "line 3: expected 2 fields, found 3");
        let message = err.to_string();
        assert!(message.contains("dropbox/report.csv"));
        assert!(message.contains("line 3"));
        assert_eq!(err.kind(), "malformed_file");
    }
}
