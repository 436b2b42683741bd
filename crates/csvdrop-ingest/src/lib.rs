//! csvdrop Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads delimited files dropped into a folder into a relational table.
//!
//! # Overview
//!
//! ```text
//! DirectoryWatcher ─┐
//!                   ├─> IngestionPipeline::process(path)
//! InitialScanner ───┘     │
//!                         ├─> RecordParser::parse      (typed RecordBatch)
//!                         ├─> BulkLoader::load         (one transaction)
//!                         └─> FileArchiver::finalize   (never overwrites)
//! ```
//!
//! - **Parsing**: header line plus positional records, declared column types
//! - **Loading**: chunked multi-row INSERT with an ingest ledger keyed by
//!   file name and content checksum so a file is never loaded twice
//! - **Archiving**: collision-safe move to the archive (or quarantine)
//! - **Watching**: `notify` events debounced per file, fed to a worker pool
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use csvdrop_ingest::{config::IngestConfig, db, loader::PgBulkLoader, service::IngestService};
//!
//! # async fn example() -> csvdrop_ingest::Result<()> {
//! let config = IngestConfig::load()?;
//! let pool = db::create_pool(&config.database).await?;
//! db::run_migrations(&pool).await?;
//!
//! let service = IngestService::bootstrap(config, Arc::new(PgBulkLoader::new(pool)))?;
//! service.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod archiver;
pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod scanner;
pub mod service;
pub mod types;
pub mod watcher;
pub mod worker;

pub use archiver::FileArchiver;
pub use error::{IngestError, Result};
pub use loader::{BulkLoader, LoadOutcome};
pub use parser::RecordParser;
pub use pipeline::{IngestionPipeline, LoadResult};
pub use scanner::InitialScanner;
pub use types::{Cell, ColumnType, ColumnTypes, FileState, RecordBatch, TargetTable, WatchedFile};
pub use watcher::DirectoryWatcher;
