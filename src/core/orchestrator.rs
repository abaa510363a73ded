//! Orchestrator: startup, the long-running service and one-shot cycles.
//!
//! Startup takes the instance lock, opens the registry, probes the backend
//! and re-queues items a previous process left in Processing. Shutdown
//! signals the watcher and the workers over one `watch` channel.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fs2::FileExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::pipeline::{Collaborators, Pipeline};
use super::worker::WorkerPool;
use crate::config::{paths, Settings};
use crate::ingest::{ScanResult, WorkQueue, Watcher, WatcherConfig};
use crate::registry::{Registry, RegistryStatus};
use crate::storage::{self, StorageBackend};
use crate::tasks::TaskManager;

/// Consecutive idle polls before a one-shot cycle gives up on sources
/// that never settle
const IDLE_POLLS_BEFORE_EXIT: usize = 3;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another orchestrator holds {}", .0.display())]
    Held(PathBuf),

    #[error("Cannot open lock file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive process-level lock; released when dropped
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let open_error = |source| LockError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(open_error)?;
        file.try_lock_exclusive()
            .map_err(|_| LockError::Held(path.to_path_buf()))?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Totals of a one-shot cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub polls: usize,
    pub queued: usize,
    pub duplicates: usize,
    pub retried: usize,
    pub status: RegistryStatus,
}

/// Wires registry, backend, queue, watcher and workers together
pub struct Orchestrator {
    settings: Settings,
    backend: Arc<dyn StorageBackend>,
    registry: Registry,
    tasks: Arc<TaskManager>,
    pipeline: Arc<Pipeline>,
    queue: WorkQueue,
    _lock: InstanceLock,
}

impl Orchestrator {
    /// Start with the configured backend and the default collaborators
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let backend = storage::from_settings(&settings)
            .await
            .context("Failed to set up storage backend")?;
        let collaborators = Collaborators::from_tools(&settings.tools);
        Self::open(settings, backend, collaborators).await
    }

    /// Start with an explicit backend and collaborators
    pub async fn open(
        settings: Settings,
        backend: Arc<dyn StorageBackend>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let home = settings.home.clone();
        tokio::fs::create_dir_all(&home)
            .await
            .with_context(|| format!("Failed to create state directory {}", home.display()))?;

        let lock = InstanceLock::acquire(&paths::lock_file(&home))?;
        let registry = Registry::open(&paths::registry_db(&home))
            .context("Failed to open item registry")?;

        backend
            .health_check()
            .await
            .with_context(|| format!("Storage backend unreachable: {}", backend.describe()))?;

        let recovered = registry.recover_in_flight().await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Re-queued items interrupted by a previous run");
        }

        if !settings.vault.is_remote() {
            init_vault(&settings.vault.local_path).await?;
        }

        let mut tasks = TaskManager::new(settings.task_root());
        if settings.vault.is_remote() {
            tasks = tasks.with_mirror(Arc::clone(&backend));
        }
        let tasks = Arc::new(tasks);

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&backend),
            Arc::clone(&tasks),
            collaborators,
            settings.safety.clone(),
            paths::work_dir(&home),
        ));
        let queue = WorkQueue::new(settings.orchestrator.queue_capacity);

        info!(
            mode = settings.storage.mode(),
            source = %backend.describe(),
            home = %home.display(),
            workers = settings.orchestrator.worker_count,
            "Orchestrator ready"
        );

        Ok(Self {
            settings,
            backend,
            registry,
            tasks,
            pipeline,
            queue,
            _lock: lock,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    fn watcher(&self) -> Watcher {
        Watcher::new(
            Arc::clone(&self.backend),
            self.registry.clone(),
            self.queue.clone(),
            WatcherConfig::from(&self.settings.orchestrator),
        )
    }

    fn workers(&self, shutdown: watch::Receiver<bool>) -> WorkerPool {
        WorkerPool::spawn(
            self.settings.orchestrator.worker_count,
            self.registry.clone(),
            self.queue.clone(),
            Arc::clone(&self.pipeline),
            shutdown,
        )
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn serve(self) -> Result<()> {
        self.serve_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves, then drain within the grace period
    pub async fn serve_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop, shutdown) = watch::channel(false);
        let watcher = tokio::spawn(self.watcher().run(shutdown.clone()));
        let pool = self.workers(shutdown);
        info!(workers = pool.size(), "Serving");

        signal.await;
        info!(in_flight = pool.in_flight(), "Shutdown requested");
        let _ = stop.send(true);

        if let Err(e) = watcher.await {
            error!(error = %e, "Watcher ended abnormally");
        }
        pool.join(self.settings.orchestrator.shutdown_grace).await;

        let status = self.registry.status().await?;
        info!(
            queued = status.queued,
            completed = status.completed,
            failed = status.failed,
            "Orchestrator stopped"
        );
        Ok(())
    }

    /// Process whatever is in the input now, then return
    pub async fn run_once(self) -> Result<CycleReport> {
        let (stop, shutdown) = watch::channel(false);
        let pool = self.workers(shutdown);
        let mut watcher = self.watcher();
        let settle = self
            .settings
            .orchestrator
            .poll_interval
            .min(Duration::from_secs(2));

        let mut report = CycleReport::default();
        let mut idle_polls = 0;
        loop {
            let scan = watcher.poll_once().await?;
            report.polls += 1;
            report.queued += scan.new_items;
            report.duplicates += scan.duplicates;
            report.retried += scan.retried;

            if is_idle(&scan) && self.queue.in_flight() == 0 {
                idle_polls += 1;
                if scan.unstable == 0 || idle_polls >= IDLE_POLLS_BEFORE_EXIT {
                    break;
                }
            } else {
                idle_polls = 0;
            }
            tokio::time::sleep(settle).await;
        }

        let _ = stop.send(true);
        pool.join(self.settings.orchestrator.shutdown_grace).await;

        report.status = self.registry.status().await?;
        info!(
            polls = report.polls,
            queued = report.queued,
            completed = report.status.completed,
            failed = report.status.failed,
            "Cycle finished"
        );
        Ok(report)
    }
}

fn is_idle(scan: &ScanResult) -> bool {
    scan.new_items == 0 && scan.requeued == 0 && scan.retried == 0
}

/// Create the vault folder layout; existing folders are left alone
pub async fn init_vault(root: &Path) -> Result<()> {
    for folder in paths::VAULT_FOLDERS {
        let dir = root.join(folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create vault folder {}", dir.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_refused() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/orchestrator.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(LockError::Held(_))
        ));

        drop(first);
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[tokio::test]
    async fn test_init_vault_creates_layout() {
        let temp = TempDir::new().unwrap();
        init_vault(temp.path()).await.unwrap();
        init_vault(temp.path()).await.unwrap();

        for folder in paths::VAULT_FOLDERS {
            assert!(temp.path().join(folder).is_dir(), "{folder} missing");
        }
    }

    #[test]
    fn test_idle_scan() {
        assert!(is_idle(&ScanResult::default()));
        assert!(!is_idle(&ScanResult {
            new_items: 1,
            ..ScanResult::default()
        }));
    }
}
