//! Scanner, worker pool and service lifecycle tests (no database)

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use csvdrop_ingest::{
    archiver::FileArchiver,
    IngestError,
    config::IngestConfig,
    parser::RecordParser,
    pipeline::IngestionPipeline,
    scanner::InitialScanner,
    service::{IngestService, ScanSummary},
    types::TargetTable,
    worker::WorkerPool,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use common::{init_tracing, InMemoryLoader};

fn test_config(root: &std::path::Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.watch.watch_dir = root.join("dropbox");
    config.watch.archive_dir = root.join("archive");
    config.watch.debounce_ms = 100;
    config.worker.workers = 2;
    config.worker.shutdown_timeout_secs = 5;
    config
}

#[test]
fn test_scanner_filters_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
    std::fs::write(dir.path().join("b.csv"), "x\n2\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
    std::fs::create_dir(dir.path().join("nested.csv")).unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("deep.csv"), "x\n3\n").unwrap();

    let scanner = InitialScanner::new(dir.path(), ".csv");
    let names = |paths: Vec<PathBuf>| -> BTreeSet<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    };

    let first = names(scanner.scan().unwrap().collect());
    assert_eq!(first, BTreeSet::from(["a.csv".to_string(), "b.csv".to_string()]));

    // A second pass sees the directory as it is now
    std::fs::remove_file(dir.path().join("a.csv")).unwrap();
    let second = names(scanner.scan().unwrap().collect());
    assert_eq!(second, BTreeSet::from(["b.csv".to_string()]));
}

#[tokio::test]
async fn test_bootstrap_creates_directories() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.watch.quarantine_dir = Some(root.path().join("quarantine"));

    let service = IngestService::bootstrap(config, Arc::new(InMemoryLoader::new())).unwrap();

    assert!(root.path().join("dropbox").is_dir());
    assert!(root.path().join("archive").is_dir());
    assert!(root.path().join("quarantine").is_dir());
    assert!(service.config().watch.watch_dir.is_absolute());
}

#[tokio::test]
async fn test_bootstrap_rejects_aliased_directories() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("sub")).unwrap();

    // Different spellings, same directory once resolved
    let mut config = test_config(root.path());
    config.watch.archive_dir = root.path().join("sub").join("..").join("dropbox");
    let err = IngestService::bootstrap(config, Arc::new(InMemoryLoader::new()))
        .err()
        .expect("aliased archive dir must be rejected");
    assert!(matches!(err, IngestError::Config(_)), "{:?}", err);

    let mut config = test_config(root.path());
    config.watch.quarantine_dir = Some(root.path().join("sub").join("..").join("archive"));
    let err = IngestService::bootstrap(config, Arc::new(InMemoryLoader::new()))
        .err()
        .expect("aliased quarantine dir must be rejected");
    assert!(matches!(err, IngestError::Config(_)), "{:?}", err);
}

#[tokio::test]
async fn test_scan_once_processes_existing_files() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let loader = Arc::new(InMemoryLoader::new());
    let service = IngestService::bootstrap(config, loader.clone()).unwrap();

    let dropbox = root.path().join("dropbox");
    std::fs::write(dropbox.join("students.csv"), "name,score\nAnn,90\nBo,75\n").unwrap();
    std::fs::write(dropbox.join("more.csv"), "name,score\nCy,60\n").unwrap();
    std::fs::write(dropbox.join("broken.csv"), "name,score\nDee\n").unwrap();
    std::fs::write(dropbox.join("readme.txt"), "ignored").unwrap();

    let summary = service.scan_once().await.unwrap();

    assert_eq!(
        summary,
        ScanSummary {
            discovered: 3,
            archived: 2,
            quarantined: 0,
            failed: 1,
            rows_inserted: 3,
        }
    );
    assert_eq!(loader.rows("students_performance").len(), 3);
    assert!(root.path().join("archive").join("students.csv").exists());
    assert!(dropbox.join("broken.csv").exists());
    assert!(dropbox.join("readme.txt").exists());
}

#[tokio::test]
async fn test_worker_pool_processes_queue_and_drains() {
    let root = tempfile::tempdir().unwrap();
    let dropbox = root.path().join("dropbox");
    let archive = root.path().join("archive");
    std::fs::create_dir_all(&dropbox).unwrap();
    std::fs::create_dir_all(&archive).unwrap();

    let loader = Arc::new(InMemoryLoader::new());
    let pipeline = Arc::new(IngestionPipeline::new(
        RecordParser::default(),
        loader.clone(),
        FileArchiver::new(&archive),
        TargetTable::new("scores"),
    ));

    let (tx, rx) = mpsc::channel(16);
    for i in 0..5 {
        let path = dropbox.join(format!("f{}.csv", i));
        std::fs::write(&path, format!("n\n{}\n", i)).unwrap();
        tx.send(path).await.unwrap();
    }

    let pool = WorkerPool::spawn(pipeline, rx, 3, CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(10), async {
        while loader.rows("scores").len() < 5 || std::fs::read_dir(&dropbox).unwrap().count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("workers did not process the queue");

    assert!(pool.drain(Duration::from_secs(5)).await);
    assert_eq!(std::fs::read_dir(&archive).unwrap().count(), 5);
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_file() {
    let root = tempfile::tempdir().unwrap();
    let dropbox = root.path().join("dropbox");
    let archive = root.path().join("archive");
    std::fs::create_dir_all(&dropbox).unwrap();
    std::fs::create_dir_all(&archive).unwrap();

    let loader = Arc::new(InMemoryLoader::new().with_delay(Duration::from_millis(300)));
    let pipeline = Arc::new(IngestionPipeline::new(
        RecordParser::default(),
        loader.clone(),
        FileArchiver::new(&archive),
        TargetTable::new("scores"),
    ));

    let (tx, rx) = mpsc::channel(4);
    let path = dropbox.join("slow.csv");
    std::fs::write(&path, "n\n1\n").unwrap();
    tx.send(path.clone()).await.unwrap();

    let pool = WorkerPool::spawn(pipeline, rx, 1, CancellationToken::new());
    while loader.load_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(pool.drain(Duration::from_secs(5)).await);
    assert!(archive.join("slow.csv").exists());
    assert!(!path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_scans_then_watches_until_shutdown() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let loader = Arc::new(InMemoryLoader::new());
    let service = IngestService::bootstrap(config, loader.clone()).unwrap();

    let dropbox = root.path().join("dropbox");
    let archive = root.path().join("archive");
    std::fs::write(dropbox.join("existing.csv"), "name,score\nAnn,90\n").unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(service.run(async {
        let _ = stop_rx.await;
    }));

    // Picked up by the initial scan
    wait_for(|| archive.join("existing.csv").exists()).await;

    // Picked up by the live watcher
    std::fs::write(dropbox.join("live.csv"), "name,score\nBo,75\n").unwrap();
    wait_for(|| archive.join("live.csv").exists()).await;

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("service did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(loader.rows("students_performance").len(), 2);
    assert!(!dropbox.join("live.csv").exists());
}

#[tokio::test]
async fn test_shutdown_during_initial_scan_finishes_current_file() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let loader = Arc::new(InMemoryLoader::new().with_delay(Duration::from_millis(300)));
    let service = IngestService::bootstrap(config, loader.clone()).unwrap();

    let dropbox = root.path().join("dropbox");
    let archive = root.path().join("archive");
    for name in ["a.csv", "b.csv", "c.csv"] {
        std::fs::write(dropbox.join(name), "name,score\nAnn,90\n").unwrap();
    }

    // Fires while the first file is still inside its load
    let shutdown = tokio::time::sleep(Duration::from_millis(100));
    tokio::time::timeout(Duration::from_secs(10), service.run(shutdown))
        .await
        .expect("service did not stop")
        .unwrap();

    assert_eq!(loader.load_calls(), 1);
    assert_eq!(loader.rows("students_performance").len(), 1);
    assert_eq!(std::fs::read_dir(&archive).unwrap().count(), 1);
    assert_eq!(std::fs::read_dir(&dropbox).unwrap().count(), 2);
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not met within 10s");
}
