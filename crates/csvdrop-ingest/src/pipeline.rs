//! Parse → load → archive for a single file

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csvdrop_common::checksum::checksum_bytes;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::archiver::FileArchiver;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::loader::{BulkLoader, FileFingerprint, LoadOutcome};
use crate::parser::{read_file, RecordParser};
use crate::types::{file_name_of, FileState, TargetTable, WatchedFile};

/// Outcome of processing one file
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub success: bool,
    pub rows_inserted: u64,
    /// `Archived`/`Quarantined` when the file left the watch directory,
    /// otherwise `Discovered` (still in place)
    pub state: FileState,
    pub archived_to: Option<PathBuf>,
    pub error: Option<IngestError>,
}

impl LoadResult {
    fn archived(path: &Path, rows_inserted: u64, destination: PathBuf) -> Self {
        Self {
            path: path.to_path_buf(),
            success: true,
            rows_inserted,
            state: FileState::Archived,
            archived_to: Some(destination),
            error: None,
        }
    }

    fn failed(path: &Path, rows_inserted: u64, error: IngestError) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            rows_inserted,
            state: FileState::Discovered,
            archived_to: None,
            error: Some(error),
        }
    }

    fn quarantined(path: &Path, destination: PathBuf, error: IngestError) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            rows_inserted: 0,
            state: FileState::Quarantined,
            archived_to: Some(destination),
            error: Some(error),
        }
    }
}

/// Orchestrates one file end to end and guards against processing the
/// same path twice at once
pub struct IngestionPipeline {
    parser: RecordParser,
    loader: Arc<dyn BulkLoader>,
    archiver: FileArchiver,
    quarantine: Option<FileArchiver>,
    table: TargetTable,
    dedupe_by_checksum: bool,
    in_flight: DashMap<PathBuf, WatchedFile>,
}

/// Clears the in-flight entry on every exit path
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<PathBuf, WatchedFile>,
    key: PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

impl IngestionPipeline {
    pub fn new(
        parser: RecordParser,
        loader: Arc<dyn BulkLoader>,
        archiver: FileArchiver,
        table: TargetTable,
    ) -> Self {
        Self {
            parser,
            loader,
            archiver,
            quarantine: None,
            table,
            dedupe_by_checksum: true,
            in_flight: DashMap::new(),
        }
    }

    pub fn from_config(config: &IngestConfig, loader: Arc<dyn BulkLoader>) -> Self {
        Self::new(
            RecordParser::from_config(&config.table),
            loader,
            FileArchiver::new(&config.watch.archive_dir),
            config.table.target(),
        )
        .with_quarantine(config.watch.quarantine_dir.as_ref().map(FileArchiver::new))
        .with_dedupe(config.table.dedupe_by_checksum)
    }

    pub fn with_quarantine(mut self, quarantine: Option<FileArchiver>) -> Self {
        self.quarantine = quarantine;
        self
    }

    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe_by_checksum = enabled;
        self
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    pub fn loader(&self) -> &Arc<dyn BulkLoader> {
        &self.loader
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.contains_key(&tracking_key(path))
    }

    /// Snapshot of the files currently being processed, oldest first
    pub fn in_flight(&self) -> Vec<WatchedFile> {
        let mut files: Vec<WatchedFile> = self
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        files.sort_by_key(|f| f.discovered_at);
        files
    }

    /// Process `path` into the configured table
    pub async fn process(&self, path: &Path) -> LoadResult {
        self.process_for(path, &self.table).await
    }

    /// Process `path` into `table`
    ///
    /// Never returns an error: failures are logged and reported in the
    /// result. A call for a path that is already being processed is
    /// rejected without touching the file.
    pub async fn process_for(&self, path: &Path, table: &TargetTable) -> LoadResult {
        let Some(_guard) = self.claim(path) else {
            debug!(path = %path.display(), "Already processing, skipping");
            return LoadResult::failed(
                path,
                0,
                IngestError::AlreadyInProgress {
                    path: path.to_path_buf(),
                },
            );
        };

        let span = info_span!("process_file", path = %path.display(), table = %table.name());
        let result = self.run(path, table).instrument(span).await;

        if let Some(err) = &result.error {
            warn!(
                path = %path.display(),
                kind = err.kind(),
                error = %err,
                "File not ingested"
            );
        }
        result
    }

    fn claim(&self, path: &Path) -> Option<InFlightGuard<'_>> {
        let key = tracking_key(path);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let mut file = WatchedFile::discovered(&key);
                file.state = FileState::Processing;
                slot.insert(file);
                Some(InFlightGuard {
                    in_flight: &self.in_flight,
                    key,
                })
            }
        }
    }

    async fn run(&self, path: &Path, table: &TargetTable) -> LoadResult {
        let data = match read_file(path).await {
            Ok(data) => data,
            Err(e) => return LoadResult::failed(path, 0, e),
        };

        let batch = match self.parser.parse_bytes(path, &data) {
            Ok(batch) => batch,
            Err(e @ IngestError::MalformedFile { .. }) => return self.reject(path, e).await,
            Err(e) => return LoadResult::failed(path, 0, e),
        };

        let rows_inserted = if batch.is_empty() {
            debug!("No data rows, archiving without load");
            0
        } else {
            let fingerprint = self.dedupe_by_checksum.then(|| FileFingerprint {
                checksum: checksum_bytes(&data),
                file_name: file_name_of(path),
            });

            match self.loader.load(&batch, table, fingerprint.as_ref()).await {
                Ok(LoadOutcome::Inserted(rows)) => rows,
                Ok(LoadOutcome::AlreadyLoaded) => {
                    warn!(
                        file_name = %file_name_of(path),
                        "This file was already loaded into the table, archiving without insert"
                    );
                    0
                }
                Err(e) => return LoadResult::failed(path, 0, e),
            }
        };

        match self.archiver.finalize(path).await {
            Ok(destination) => {
                info!(
                    rows = rows_inserted,
                    archived_to = %destination.display(),
                    "File ingested"
                );
                LoadResult::archived(path, rows_inserted, destination)
            }
            Err(e) => {
                error!(
                    critical = true,
                    rows = rows_inserted,
                    error = %e,
                    "Rows committed but file could not be archived"
                );
                LoadResult::failed(path, rows_inserted, e)
            }
        }
    }

    /// Quarantine a malformed file when configured, otherwise leave it
    async fn reject(&self, path: &Path, cause: IngestError) -> LoadResult {
        let Some(quarantine) = &self.quarantine else {
            return LoadResult::failed(path, 0, cause);
        };

        match quarantine.finalize(path).await {
            Ok(destination) => {
                warn!(
                    quarantined_to = %destination.display(),
                    error = %cause,
                    "Malformed file quarantined"
                );
                LoadResult::quarantined(path, destination, cause)
            }
            Err(e) => {
                warn!(error = %e, "Could not quarantine malformed file, leaving in place");
                LoadResult::failed(path, 0, cause)
            }
        }
    }
}

fn tracking_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
