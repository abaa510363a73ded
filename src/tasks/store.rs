//! On-disk task area: `Tasks/<id>.md` for open tasks, `Tasks/Archive/<id>.md`
//! for done ones.

use std::path::{Path, PathBuf};

use super::document;
use super::TaskError;
use crate::config::paths;
use crate::domain::{Task, TaskStatus};
use crate::storage::local::{remove_if_present, write_atomic};

/// Where a task document currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Active,
    Archived,
}

impl Placement {
    pub fn for_status(status: TaskStatus) -> Self {
        if status.is_terminal() {
            Self::Archived
        } else {
            Self::Active
        }
    }

    /// Vault-relative path of a task document
    pub fn relative_path(&self, id: &str) -> String {
        match self {
            Self::Active => format!("{}/{}.md", paths::TASKS, id),
            Self::Archived => format!("{}/{}.md", paths::TASK_ARCHIVE, id),
        }
    }
}

/// Result of persisting a task
#[derive(Debug, Clone)]
pub struct Saved {
    pub relative_path: String,
    pub content: String,

    /// Previous document removed by a move (e.g. into the archive)
    pub moved_from: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Store rooted at a vault (or vault mirror) directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, relative: &str) -> Result<Option<Task>, TaskError> {
        let path = self.root.join(relative);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        document::parse(&text)
            .map(Some)
            .map_err(|source| TaskError::Document { path, source })
    }

    /// Load a task by id from either area
    pub async fn load(&self, id: &str) -> Result<Option<(Task, Placement)>, TaskError> {
        for placement in [Placement::Active, Placement::Archived] {
            if let Some(task) = self.read(&placement.relative_path(id)).await? {
                return Ok(Some((task, placement)));
            }
        }
        Ok(None)
    }

    /// Write a task into the area matching its status, removing any copy in
    /// the other area
    pub async fn save(&self, task: &Task) -> Result<Saved, TaskError> {
        let placement = Placement::for_status(task.status);
        let other = match placement {
            Placement::Active => Placement::Archived,
            Placement::Archived => Placement::Active,
        };
        let relative = placement.relative_path(&task.id);
        let stale = other.relative_path(&task.id);
        let content = document::render(task)?;

        let root = self.root.clone();
        let (target, bytes) = (relative.clone(), content.clone().into_bytes());
        let stale_path = stale.clone();
        let moved = tokio::task::spawn_blocking(move || -> Result<bool, TaskError> {
            write_atomic(&root, &target, &bytes)?;
            let had_stale = root.join(&stale_path).exists();
            remove_if_present(&root, &stale_path)?;
            Ok(had_stale)
        })
        .await
        .map_err(|e| TaskError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        Ok(Saved {
            relative_path: relative,
            content,
            moved_from: moved.then_some(stale),
        })
    }

    /// All tasks, active and archived. Unreadable documents are skipped.
    pub async fn list(&self) -> Result<Vec<Task>, TaskError> {
        let mut tasks = Vec::new();
        for folder in [paths::TASKS, paths::TASK_ARCHIVE] {
            let dir = self.root.join(folder);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let text = match tokio::fs::read_to_string(&path).await {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                match document::parse(&text) {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable task document")
                    }
                }
            }
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }
}
