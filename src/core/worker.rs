//! Worker pool draining the work queue.
//!
//! Each item's pipeline runs in its own spawned task so a panic or an abort
//! at shutdown is caught at the worker boundary and recorded, and the worker
//! moves on to the next item.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{error, info, warn};

use super::pipeline::{Pipeline, ProcessOutcome};
use crate::domain::{ItemFailure, ItemIdentity, WorkItem};
use crate::ingest::WorkQueue;
use crate::registry::{Registry, RegistryError};

/// Time allowed for the error report of an item aborted at shutdown
pub const SHUTDOWN_REPORT_BUDGET: Duration = Duration::from_secs(3);

/// State shared by all workers of a pool
struct Shared {
    registry: Registry,
    queue: WorkQueue,
    pipeline: Arc<Pipeline>,
    in_flight: Mutex<HashMap<ItemIdentity, AbortHandle>>,
    aborting: AtomicBool,
}

impl Shared {
    fn track(&self, identity: &ItemIdentity, handle: AbortHandle) {
        // Work started after the grace period is cut off right away
        if self.aborting.load(Ordering::SeqCst) {
            handle.abort();
        }
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(identity.clone(), handle);
        }
    }

    fn untrack(&self, identity: &ItemIdentity) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(identity);
        }
    }

    fn abort_in_flight(&self) -> usize {
        self.aborting.store(true, Ordering::SeqCst);
        match self.in_flight.lock() {
            Ok(in_flight) => {
                for handle in in_flight.values() {
                    handle.abort();
                }
                in_flight.len()
            }
            Err(_) => 0,
        }
    }

    /// Write the error report. After an abort the pool is already past its
    /// grace period, so the report only gets a short, fixed budget.
    async fn report(&self, worker: usize, item: &WorkItem, failure: &ItemFailure) {
        let report = self.pipeline.report_failure(item, failure);
        if !matches!(failure, ItemFailure::Shutdown) {
            report.await;
            return;
        }
        if tokio::time::timeout(SHUTDOWN_REPORT_BUDGET, report).await.is_err() {
            warn!(
                worker,
                identity = %item.identity,
                budget_secs = SHUTDOWN_REPORT_BUDGET.as_secs(),
                "Error report abandoned at shutdown"
            );
        }
    }

    async fn handle(&self, worker: usize, item: WorkItem) {
        let identity = item.identity.clone();

        let claimed = match self.registry.mark_processing(&identity).await {
            Ok(claimed) => claimed,
            Err(RegistryError::AlreadyProcessing(_)) => {
                warn!(worker, identity = %identity, "Item already claimed, skipping");
                self.queue.finish(&identity);
                return;
            }
            Err(e) => {
                error!(worker, identity = %identity, error = %e, "Could not claim item");
                self.queue.finish(&identity);
                return;
            }
        };

        let pipeline = Arc::clone(&self.pipeline);
        let work = claimed.clone();
        let task = tokio::spawn(async move { pipeline.process(&work).await });
        self.track(&identity, task.abort_handle());
        let joined = task.await;
        self.untrack(&identity);

        match outcome_of(joined) {
            Ok(outcome) => {
                if let Err(e) = self.registry.mark_completed(&identity).await {
                    error!(worker, identity = %identity, error = %e, "Could not record completion");
                } else {
                    info!(
                        worker,
                        identity = %identity,
                        title = %outcome.title,
                        archived_to = %outcome.archived_to,
                        "Item completed"
                    );
                }
            }
            Err(failure) => {
                warn!(
                    worker,
                    identity = %identity,
                    stage = failure.stage_label().unwrap_or("worker"),
                    error = %failure,
                    "Item failed"
                );
                self.report(worker, &claimed, &failure).await;
                if let Err(e) = self.registry.mark_failed(&identity, &failure).await {
                    error!(worker, identity = %identity, error = %e, "Could not record failure");
                }
            }
        }

        self.queue.finish(&identity);
    }
}

fn outcome_of(
    joined: Result<Result<ProcessOutcome, ItemFailure>, JoinError>,
) -> Result<ProcessOutcome, ItemFailure> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ItemFailure::Panicked {
            message: panic_message(e.into_panic()),
        }),
        Err(_) => Err(ItemFailure::Shutdown),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves once `shutdown` is true or its sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn worker_loop(worker: usize, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    info!(worker, "Worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            item = shared.queue.pop() => match item {
                Some(item) => item,
                None => break,
            },
        };
        shared.handle(worker, item).await;
    }
    info!(worker, "Worker stopped");
}

/// Fixed pool of workers sharing one queue
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start `count` workers. They stop taking new items once `shutdown`
    /// flips to true.
    pub fn spawn(
        count: usize,
        registry: Registry,
        queue: WorkQueue,
        pipeline: Arc<Pipeline>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let shared = Arc::new(Shared {
            registry,
            queue,
            pipeline,
            in_flight: Mutex::new(HashMap::new()),
            aborting: AtomicBool::new(false),
        });
        let workers = (0..count.max(1))
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&shared), shutdown.clone())))
            .collect();
        Self { workers, shared }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Items currently inside a pipeline run
    pub fn in_flight(&self) -> usize {
        self.shared
            .in_flight
            .lock()
            .map(|in_flight| in_flight.len())
            .unwrap_or(0)
    }

    /// Wait for the workers to finish their current item. After `grace`,
    /// in-flight runs are aborted and recorded as failed by shutdown.
    pub async fn join(mut self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        let mut expired = false;

        for worker in self.workers.iter_mut() {
            if !expired {
                match tokio::time::timeout_at(deadline, &mut *worker).await {
                    Ok(_) => continue,
                    Err(_) => {
                        expired = true;
                        let aborted = self.shared.abort_in_flight();
                        warn!(
                            aborted,
                            grace_secs = grace.as_secs(),
                            "Shutdown grace elapsed, aborting in-flight items"
                        );
                    }
                }
            }
            if let Err(e) = worker.await {
                error!(error = %e, "Worker ended abnormally");
            }
        }
    }
}
