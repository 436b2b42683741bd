//! Shared helpers for the database-free integration tests
//!
//! [`InMemoryLoader`] stands in for PostgreSQL so the pipeline, worker pool
//! and service can be driven end to end against a temp directory.
//!
//! ```no_run
//! mod common;
//! use common::{init_tracing, InMemoryLoader};
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use csvdrop_ingest::{
    loader::{BulkLoader, FileFingerprint, LoadOutcome},
    types::{Cell, RecordBatch, TargetTable},
    IngestError, Result,
};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("csvdrop_ingest=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// Ledger key mirroring the primary key of `csvdrop_ingested_files`
type LedgerKey = (String, String, String);

/// Keeps committed rows and ledger entries per table in memory
///
/// A failure can be injected to simulate a rolled-back transaction, and a
/// delay to hold a load open while another call races it.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    tables: Mutex<HashMap<String, Vec<Vec<(String, Cell)>>>>,
    ledger: Mutex<HashSet<LedgerKey>>,
    fail_with: Mutex<Option<String>>,
    delay: Option<Duration>,
    load_calls: AtomicUsize,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every subsequent load fail with `reason` until cleared
    pub fn fail_loads(&self, reason: Option<&str>) {
        *self.fail_with.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Committed rows of `table` as column/value pairs
    pub fn rows(&self, table: &str) -> Vec<Vec<(String, Cell)>> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BulkLoader for InMemoryLoader {
    async fn load(
        &self,
        batch: &RecordBatch,
        table: &TargetTable,
        fingerprint: Option<&FileFingerprint>,
    ) -> Result<LoadOutcome> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = failure {
            return Err(IngestError::load(table.name(), reason));
        }

        let batch = batch.without_columns(table.exclude_columns());

        // Ledger and rows change under one lock order so a load is atomic
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(fingerprint) = fingerprint {
            let key = (
                fingerprint.checksum.clone(),
                table.name().to_string(),
                fingerprint.file_name.clone(),
            );
            if !ledger.insert(key) {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
        }

        let rows = tables.entry(table.name().to_string()).or_default();
        for row in batch.rows() {
            rows.push(batch.columns().iter().cloned().zip(row.iter().cloned()).collect());
        }

        Ok(LoadOutcome::Inserted(batch.len() as u64))
    }

    async fn row_count(&self, table: &TargetTable) -> Result<i64> {
        Ok(self.rows(table.name()).len() as i64)
    }
}
