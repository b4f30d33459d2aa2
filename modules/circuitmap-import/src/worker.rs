use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use circuitmap_common::{CircuitMapError, Result};

use crate::importer::Importer;
use crate::status::ImportStatus;

type TaskResult = std::result::Result<Result<(i64, ImportStatus)>, JoinError>;

/// Bounded pool that claims queued runs and executes them concurrently.
pub struct ImportWorker {
    importer: Arc<Importer>,
    semaphore: Arc<Semaphore>,
    poll_interval: Duration,
}

impl ImportWorker {
    pub fn new(importer: Arc<Importer>, max_concurrent_runs: usize, poll_interval: Duration) -> Self {
        Self {
            importer,
            semaphore: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            poll_interval,
        }
    }

    /// Claim and execute runs until `shutdown` is set, then wait for in-flight
    /// runs. Returns the number of runs executed.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<usize> {
        self.process(shutdown, false).await
    }

    /// Execute queued runs until the queue is empty.
    pub async fn run_once(&self, shutdown: watch::Receiver<bool>) -> Result<usize> {
        self.process(shutdown, true).await
    }

    async fn process(&self, mut shutdown: watch::Receiver<bool>, until_empty: bool) -> Result<usize> {
        let mut tasks: JoinSet<Result<(i64, ImportStatus)>> = JoinSet::new();
        let mut processed = 0;

        loop {
            if *shutdown.borrow() {
                info!(in_flight = tasks.len(), "Shutdown requested, no longer claiming runs");
                break;
            }
            while let Some(done) = tasks.try_join_next() {
                reap(done, &mut processed);
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| CircuitMapError::unavailable("worker semaphore closed"))?
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.importer.jobs().claim_next().await {
                Ok(Some(run)) => {
                    debug!(run_id = run.id, "Claimed import run");
                    let importer = self.importer.clone();
                    let run_shutdown = shutdown.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let status = importer.execute(&run, &run_shutdown).await?;
                        Ok((run.id, status))
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if until_empty {
                        match tasks.join_next().await {
                            Some(done) => reap(done, &mut processed),
                            None => break,
                        }
                    } else if !self.idle(&mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, retryable = e.is_retryable(), "Failed to claim import run");
                    if until_empty && !e.is_retryable() {
                        return Err(e);
                    }
                    if !self.idle(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        while let Some(done) = tasks.join_next().await {
            reap(done, &mut processed);
        }
        info!(processed, "Import worker stopped");
        Ok(processed)
    }

    /// Wait one poll interval. Returns false when the worker should stop.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }
}

fn reap(done: TaskResult, processed: &mut usize) {
    match done {
        Ok(Ok((run_id, status))) => {
            *processed += 1;
            debug!(run_id, %status, "Import task finished");
        }
        Ok(Err(e)) => {
            *processed += 1;
            error!(error = %e, "Failed to record import run outcome");
        }
        Err(e) => error!(error = %e, "Import task panicked"),
    }
}
