//! Task lifecycle management.
//!
//! Tasks are created in `new` by the pipeline and afterwards only change
//! through [`TaskManager`]. Every change is written to the local task area
//! and, when the vault is remote, published to it as well.

pub mod document;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::paths;
use crate::domain::{
    Artifact, ArtifactKind, AuditEntry, Destination, InvalidTransition, ItemIdentity, Task,
    TaskCategory, TaskPriority, TaskStatus,
};
use crate::storage::{PublishError, StorageBackend};

pub use store::{Placement, TaskStore};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Nothing to edit for task {0}")]
    EmptyEdit(String),

    #[error("Unreadable task document {}: {source}", .path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: document::DocumentError,
    },

    #[error("Failed to render task: {0}")]
    Render(#[from] document::DocumentError),

    #[error("Failed to publish task: {0}")]
    Publish(#[from] PublishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic task id from the meeting, the item's position and its title.
/// Re-running a meeting yields the same ids, so tasks are never duplicated.
pub fn derive_task_id(meeting: &ItemIdentity, index: usize, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(meeting.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(index.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(title.trim().to_lowercase().as_bytes());
    format!("T-{}", &hex::encode(hasher.finalize())[..10])
}

/// Explicit priority/category change
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub priority: Option<TaskPriority>,
    pub category: Option<TaskCategory>,
}

/// Lock file guarding read-modify-write cycles on the task area
const AREA_LOCK: &str = ".tasks.lock";

/// Held for one read-modify-write cycle. The advisory file lock covers
/// other processes (the CLI next to `serve`), the mutex other tasks here.
struct AreaGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: std::fs::File,
}

/// Agile task workflow over the vault task area
pub struct TaskManager {
    store: TaskStore,
    mirror: Option<Arc<dyn StorageBackend>>,
    lock: Mutex<()>,
}

impl TaskManager {
    /// Manager over a local task area (vault root or mirror directory)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: TaskStore::new(root),
            mirror: None,
            lock: Mutex::new(()),
        }
    }

    /// Also publish every change to the backend's vault destination
    pub fn with_mirror(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.mirror = Some(backend);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    async fn lock_area(&self) -> Result<AreaGuard<'_>, TaskError> {
        let local = self.lock.lock().await;
        let path = self.store.root().join(paths::TASKS).join(AREA_LOCK);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        Ok(AreaGuard {
            _local: local,
            _file: file,
        })
    }

    async fn persist(&self, task: &Task) -> Result<(), TaskError> {
        let saved = self.store.save(task).await?;

        if let Some(backend) = &self.mirror {
            let artifact = Artifact::new(
                saved.relative_path.clone(),
                ArtifactKind::TaskDocument,
                saved.content,
            );
            backend.publish(&artifact, Destination::Vault).await?;
            if let Some(previous) = &saved.moved_from {
                backend.unpublish(previous, Destination::Vault).await?;
            }
        }

        if saved.moved_from.is_some() {
            tracing::info!(task = %task.id, path = %saved.relative_path, "Task archived");
        }
        Ok(())
    }

    /// Persist tasks produced by the pipeline. Tasks that already exist
    /// keep their current state. Returns how many were new.
    pub async fn record_extracted(&self, tasks: &[Task]) -> Result<usize, TaskError> {
        let _guard = self.lock_area().await?;
        let mut created = 0;

        for task in tasks {
            match self.store.load(&task.id).await? {
                Some((existing, _)) => {
                    // Re-publish so an earlier partial commit reaches the mirror
                    if self.mirror.is_some() {
                        self.persist(&existing).await?;
                    }
                    tracing::debug!(task = %task.id, status = %existing.status, "Task already recorded");
                }
                None => {
                    self.persist(task).await?;
                    created += 1;
                    tracing::info!(
                        task = %task.id,
                        title = %task.title,
                        priority = %task.priority,
                        "Task created"
                    );
                }
            }
        }
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Task, TaskError> {
        self.store
            .load(id)
            .await?
            .map(|(task, _)| task)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// All tasks, optionally filtered by status
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskError> {
        let tasks = self.store.list().await?;
        Ok(match status {
            Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
            None => tasks,
        })
    }

    /// Move a task along the workflow. Rejected moves change nothing.
    pub async fn transition(
        &self,
        id: &str,
        next: TaskStatus,
        reason: &str,
    ) -> Result<Task, TaskError> {
        let _guard = self.lock_area().await?;
        let mut task = self.get(id).await?;
        let from = task.status;

        task.transition(next, reason)?;
        self.persist(&task).await?;

        tracing::info!(task = %id, %from, to = %next, "Task moved");
        Ok(task)
    }

    /// Change priority and/or category
    pub async fn edit(&self, id: &str, edit: TaskEdit) -> Result<Task, TaskError> {
        let _guard = self.lock_area().await?;
        let mut task = self.get(id).await?;

        let mut changes = Vec::new();
        if let Some(priority) = edit.priority.filter(|p| *p != task.priority) {
            changes.push(format!("priority {} → {}", task.priority, priority));
            task.priority = priority;
        }
        if let Some(category) = edit.category.filter(|c| *c != task.category) {
            changes.push(format!("category {} → {}", task.category, category));
            task.category = category;
        }
        if changes.is_empty() {
            return Err(TaskError::EmptyEdit(id.to_string()));
        }

        let now = chrono::Utc::now();
        task.updated_at = now;
        task.audit.push(AuditEntry {
            status: task.status,
            at: now,
            reason: changes.join(", "),
        });
        self.persist(&task).await?;

        tracing::info!(task = %id, changes = %changes.join(", "), "Task edited");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(id: &str) -> Task {
        Task::new(
            id.to_string(),
            "Send deck".to_string(),
            TaskCategory::Business,
            TaskPriority::Medium,
            ItemIdentity::new("local:m"),
        )
    }

    #[test]
    fn test_derived_ids_are_stable() {
        let meeting = ItemIdentity::new("local:abc");
        let a = derive_task_id(&meeting, 0, "Send deck");
        let b = derive_task_id(&meeting, 0, "  send DECK ");
        let c = derive_task_id(&meeting, 1, "Send deck");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("T-"));
        assert_eq!(a.len(), 12);
    }

    #[tokio::test]
    async fn test_record_extracted_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = TaskManager::new(temp.path());

        assert_eq!(manager.record_extracted(&[task("T-1")]).await.unwrap(), 1);
        manager
            .transition("T-1", TaskStatus::Ready, "groomed")
            .await
            .unwrap();

        // A retried meeting must not reset progress
        assert_eq!(manager.record_extracted(&[task("T-1")]).await.unwrap(), 0);
        assert_eq!(manager.get("T-1").await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_edit_records_audit() {
        let temp = TempDir::new().unwrap();
        let manager = TaskManager::new(temp.path());
        manager.record_extracted(&[task("T-1")]).await.unwrap();

        let edited = manager
            .edit(
                "T-1",
                TaskEdit {
                    priority: Some(TaskPriority::Critical),
                    category: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.priority, TaskPriority::Critical);
        assert_eq!(edited.status, TaskStatus::New);
        assert!(edited.audit.last().unwrap().reason.contains("medium → critical"));

        let unchanged = manager
            .edit(
                "T-1",
                TaskEdit {
                    priority: Some(TaskPriority::Critical),
                    category: None,
                },
            )
            .await;
        assert!(matches!(unchanged, Err(TaskError::EmptyEdit(_))));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let temp = TempDir::new().unwrap();
        let manager = TaskManager::new(temp.path());
        assert!(matches!(
            manager.transition("T-x", TaskStatus::Ready, "").await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_changes_wait_for_another_process_holding_the_area() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(TaskManager::new(temp.path()));
        manager.record_extracted(&[task("T-1")]).await.unwrap();

        // Another process (e.g. `task move` from the CLI) holds the area
        let other = std::fs::File::create(temp.path().join("Tasks").join(AREA_LOCK)).unwrap();
        other.lock_exclusive().unwrap();

        let waiting = Arc::clone(&manager);
        let moved = tokio::spawn(async move {
            waiting.transition("T-1", TaskStatus::Ready, "groomed").await
        });
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!moved.is_finished());
        assert_eq!(manager.store().load("T-1").await.unwrap().unwrap().0.status, TaskStatus::New);

        other.unlock().unwrap();
        let task = moved.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }
}
