//! Transactional bulk loading of record batches
//!
//! [`PgBulkLoader`] writes to PostgreSQL. Other sinks implement
//! [`BulkLoader`] to drive the pipeline without a database.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RecordBatch, TargetTable};

pub mod postgres;

pub use postgres::PgBulkLoader;

/// Content identity of a loaded file, recorded in the ingest ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// SHA-256 of the raw file bytes, lowercase hex
    pub checksum: String,
    pub file_name: String,
}

/// What a successful load did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted(u64),
    /// The fingerprint was already in the ledger; nothing was inserted
    AlreadyLoaded,
}

impl LoadOutcome {
    pub fn rows_inserted(self) -> u64 {
        match self {
            LoadOutcome::Inserted(rows) => rows,
            LoadOutcome::AlreadyLoaded => 0,
        }
    }
}

/// Storage sink for parsed batches
///
/// `load` is all-or-nothing: either every row of the batch (minus excluded
/// columns) is committed together with the ledger entry, or nothing is.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    async fn load(
        &self,
        batch: &RecordBatch,
        table: &TargetTable,
        fingerprint: Option<&FileFingerprint>,
    ) -> Result<LoadOutcome>;

    /// Number of rows currently in `table`
    async fn row_count(&self, table: &TargetTable) -> Result<i64>;
}
