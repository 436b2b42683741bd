//! Process lifecycle: bootstrap, initial scan, watch, drain

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::loader::BulkLoader;
use crate::pipeline::IngestionPipeline;
use crate::scanner::InitialScanner;
use crate::types::FileState;
use crate::watcher::DirectoryWatcher;
use crate::worker::WorkerPool;

/// Tally of one pass over the watch directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub discovered: usize,
    pub archived: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub rows_inserted: u64,
}

pub struct IngestService {
    config: IngestConfig,
    pipeline: Arc<IngestionPipeline>,
    scanner: InitialScanner,
    watcher: DirectoryWatcher,
}

impl IngestService {
    /// Create the directories and wire the components
    ///
    /// Directory paths in the returned service's config are canonical.
    pub fn bootstrap(mut config: IngestConfig, loader: Arc<dyn BulkLoader>) -> Result<Self> {
        config.watch.watch_dir = ensure_directory(&config.watch.watch_dir)?;
        config.watch.archive_dir = ensure_directory(&config.watch.archive_dir)?;
        if let Some(quarantine) = &config.watch.quarantine_dir {
            config.watch.quarantine_dir = Some(ensure_directory(quarantine)?);
        }
        check_distinct(&config)?;

        let pipeline = Arc::new(IngestionPipeline::from_config(&config, loader));
        let scanner = InitialScanner::new(&config.watch.watch_dir, &config.watch.file_suffix);
        let watcher = DirectoryWatcher::new(
            &config.watch.watch_dir,
            &config.watch.file_suffix,
            config.watch.debounce(),
        );

        info!(
            watch_dir = %config.watch.watch_dir.display(),
            archive_dir = %config.watch.archive_dir.display(),
            table = %config.table.name,
            "Ingest service ready"
        );

        Ok(Self {
            config,
            pipeline,
            scanner,
            watcher,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    /// Process every file currently in the watch directory, one at a time
    pub async fn scan_once(&self) -> Result<ScanSummary> {
        self.scan_until(&CancellationToken::new()).await
    }

    /// Like [`scan_once`](Self::scan_once), but takes no new file once
    /// `stop` is cancelled
    ///
    /// The file being processed when `stop` fires runs to completion.
    pub async fn scan_until(&self, stop: &CancellationToken) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        for path in self.scanner.scan()? {
            if stop.is_cancelled() {
                info!(
                    processed = summary.discovered,
                    "Initial scan interrupted by shutdown, remaining files stay in place"
                );
                break;
            }
            summary.discovered += 1;
            let result = self.pipeline.process(&path).await;
            summary.rows_inserted += result.rows_inserted;
            match result.state {
                FileState::Archived => summary.archived += 1,
                FileState::Quarantined => summary.quarantined += 1,
                _ => summary.failed += 1,
            }
        }

        info!(
            discovered = summary.discovered,
            archived = summary.archived,
            quarantined = summary.quarantined,
            failed = summary.failed,
            rows_inserted = summary.rows_inserted,
            "Initial scan complete"
        );
        Ok(summary)
    }

    /// Log the current row count of the target table
    pub async fn report_row_count(&self) {
        let table = self.pipeline.table();
        match self.pipeline.loader().row_count(table).await {
            Ok(count) => info!(table = %table.name(), rows = count, "Current table size"),
            Err(e) => warn!(table = %table.name(), error = %e, "Could not count table rows"),
        }
    }

    /// Watch until `shutdown` resolves, then drain in-flight work
    ///
    /// The watcher attaches before the initial scan so no file written
    /// during the scan is missed; its dispatches queue up until the workers
    /// start after the scan. `shutdown` is polled from the start: if it
    /// resolves during the scan, the current file finishes and the service
    /// stops without starting workers.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let (ready_tx, ready_rx) = mpsc::channel(self.config.worker.queue_capacity);
        let watch = self.watcher.start(ready_tx)?;

        let stop = CancellationToken::new();
        let scan = self.scan_until(&stop);
        tokio::pin!(scan);

        let early = tokio::select! {
            scanned = &mut scan => Some(scanned),
            () = shutdown.as_mut() => None,
        };
        let scanned = match early {
            Some(scanned) => scanned,
            None => {
                info!("Shutdown requested during initial scan");
                stop.cancel();
                let scanned = scan.await;
                watch.stop().await;
                info!("Ingest service stopped");
                return scanned.map(|_| ());
            }
        };
        if let Err(e) = scanned {
            watch.stop().await;
            return Err(e);
        }
        self.report_row_count().await;

        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(
            Arc::clone(&self.pipeline),
            ready_rx,
            self.config.worker.workers,
            cancel,
        );

        shutdown.await;
        info!("Shutting down ingest service");

        watch.stop().await;
        let pending = self.pipeline.in_flight();
        if !pending.is_empty() {
            info!(files = pending.len(), "Waiting for in-flight files");
        }
        let drained = pool.drain(self.config.worker.shutdown_timeout()).await;
        if !drained {
            for file in &pending {
                warn!(
                    path = %file.path.display(),
                    started_at = %file.discovered_at,
                    "File was still processing at shutdown"
                );
            }
        }

        info!("Ingest service stopped");
        Ok(())
    }
}

/// Watch, archive and quarantine must resolve to three different directories
fn check_distinct(config: &IngestConfig) -> Result<()> {
    let watch = &config.watch;
    if watch.watch_dir == watch.archive_dir {
        return Err(IngestError::Config(format!(
            "watch and archive directories both resolve to '{}'",
            watch.watch_dir.display()
        )));
    }
    if let Some(quarantine) = &watch.quarantine_dir {
        if quarantine == &watch.watch_dir || quarantine == &watch.archive_dir {
            return Err(IngestError::Config(format!(
                "quarantine directory '{}' must differ from the watch and archive directories",
                quarantine.display()
            )));
        }
    }
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(path).map_err(|e| IngestError::directory_access(path, e))?;
    std::fs::canonicalize(path).map_err(|e| IngestError::directory_access(path, e))
}
