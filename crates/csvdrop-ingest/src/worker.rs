//! Worker pool draining the stabilized-path queue

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::IngestionPipeline;

/// N tasks pulling paths from one bounded queue and running the pipeline
///
/// Cancellation stops workers from taking new paths; a path already being
/// processed always runs to completion.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        pipeline: Arc<IngestionPipeline>,
        queue: mpsc::Receiver<PathBuf>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));

        let handles = (0..workers.max(1))
            .map(|id| {
                let pipeline = Arc::clone(&pipeline);
                let queue = Arc::clone(&queue);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(id, pipeline, queue, cancel).await;
                })
            })
            .collect();

        info!(workers = workers.max(1), "Worker pool started");
        Self { handles, cancel }
    }

    /// Stop taking work and wait for in-flight files, up to `timeout`
    ///
    /// Returns `false` when the timeout hit and remaining workers were aborted.
    pub async fn drain(self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let aborts: Vec<_> = self.handles.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(timeout, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Worker ended abnormally");
                    }
                }
                info!("Worker pool drained");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout reached, aborting remaining workers"
                );
                for handle in aborts {
                    handle.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(
    id: usize,
    pipeline: Arc<IngestionPipeline>,
    queue: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                path = queue.recv() => path,
            }
        };

        let Some(path) = next else {
            break;
        };

        debug!(worker = id, path = %path.display(), "Picked up file");
        pipeline.process(&path).await;
    }
    debug!(worker = id, "Worker stopped");
}
