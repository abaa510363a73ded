//! Storage backends.
//!
//! The orchestrator only ever talks to [`StorageBackend`]. Two
//! implementations exist and are chosen at startup:
//!
//! - [`LocalBackend`]: mounted directories, optional `notify` change feed
//! - [`CloudBackend`]: Google Drive v3 folders addressed by id
//!
//! Locations produced by a backend are opaque to everyone else and stable
//! across restarts.

pub mod auth;
pub mod cloud;
pub mod local;

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{Settings, StorageSettings};
use crate::domain::{Artifact, BackendKind, Destination, Fingerprint, ItemIdentity, StorageLocation};

pub use auth::{AuthError, FileTokenProvider, StaticToken, TokenProvider};
pub use cloud::{CloudBackend, DriveError, VaultTarget};
pub use local::LocalBackend;

/// Errors while reading from a backend
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Location belongs to another backend: {0}")]
    ForeignLocation(StorageLocation),

    #[error("Source no longer exists: {0}")]
    NotFound(StorageLocation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Drive error: {0}")]
    Remote(#[from] DriveError),
}

/// Errors while writing to a backend
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Location belongs to another backend: {0}")]
    ForeignLocation(StorageLocation),

    #[error("Artifact path escapes its destination: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Drive error: {0}")]
    Remote(#[from] DriveError),
}

/// One entry from an input listing
#[derive(Debug, Clone)]
pub struct ListedItem {
    pub location: StorageLocation,

    /// File name as shown to users
    pub name: String,

    pub size_bytes: u64,

    pub modified: Option<DateTime<Utc>>,

    /// Content checksum reported by the store, if any
    pub checksum: Option<String>,
}

/// Early-wake signal from a backend that can observe its input
pub struct ChangeFeed {
    rx: mpsc::Receiver<()>,
    _guard: Box<dyn Any + Send>,
}

impl ChangeFeed {
    /// `guard` keeps the underlying watcher alive for as long as the feed
    pub fn new(rx: mpsc::Receiver<()>, guard: Box<dyn Any + Send>) -> Self {
        Self { rx, _guard: guard }
    }

    /// Wait for the next change. Returns false once the feed is closed.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Storage abstraction shared by the watcher and the pipeline
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Short description for logs (directory or folder id)
    fn describe(&self) -> String;

    /// Items in the input location that match the input patterns.
    /// Side-effect free; filtering against the registry is the caller's job.
    async fn list_new_items(&self) -> Result<Vec<ListedItem>, RetrievalError>;

    /// Stable identity and duplicate-detection fingerprint
    async fn identify(
        &self,
        item: &ListedItem,
    ) -> Result<(ItemIdentity, Fingerprint), RetrievalError>;

    /// Copy/download the source into `into_dir`, returning the local path
    async fn fetch(
        &self,
        location: &StorageLocation,
        into_dir: &Path,
    ) -> Result<PathBuf, RetrievalError>;

    /// Publish an artifact. An existing artifact at the same path is replaced.
    async fn publish(
        &self,
        artifact: &Artifact,
        destination: Destination,
    ) -> Result<StorageLocation, PublishError>;

    /// Remove a previously published artifact; missing artifacts are not an error
    async fn unpublish(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<(), PublishError>;

    /// Whether an artifact is already present at `relative_path`
    async fn exists(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<bool, PublishError>;

    /// Move a source into the processed location
    async fn archive(&self, location: &StorageLocation) -> Result<StorageLocation, PublishError>;

    /// First-contact probe
    async fn health_check(&self) -> Result<(), RetrievalError>;

    /// Optional change feed used to wake the watcher early
    fn subscribe(&self) -> Option<ChangeFeed> {
        None
    }
}

/// Reject artifact paths that are absolute or climb out of their root
pub(crate) fn checked_relative(relative_path: &str) -> Result<&str, PublishError> {
    let trimmed = relative_path.trim_start_matches("./");
    let escapes = trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || trimmed.split(['/', '\\']).any(|s| s == "..");
    if escapes {
        return Err(PublishError::InvalidPath(relative_path.to_string()));
    }
    Ok(trimmed)
}

/// Build the backend selected by configuration
pub async fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match &settings.storage {
        StorageSettings::Local(local) => Ok(Arc::new(LocalBackend::new(
            local.input_dir.clone(),
            local.output_dir.clone(),
            local.processed_dir.clone(),
            settings.vault.local_path.clone(),
            settings.safety.clone(),
        ))),
        StorageSettings::Cloud(cloud) => {
            let tokens = FileTokenProvider::load(
                &cloud.credentials_path,
                &cloud.token_path,
                &cloud.token_endpoint,
            )
            .await?;
            let vault = match &settings.vault.remote_folder_id {
                Some(folder_id) => VaultTarget::Remote(folder_id.clone()),
                None => VaultTarget::Local(settings.vault.local_path.clone()),
            };
            Ok(Arc::new(CloudBackend::new(
                cloud.clone(),
                vault,
                Arc::new(tokens),
                settings.safety.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_relative_accepts_nested_paths() {
        assert_eq!(checked_relative("Tasks/T-1.md").unwrap(), "Tasks/T-1.md");
        assert_eq!(checked_relative("./a.md").unwrap(), "a.md");
    }

    #[test]
    fn test_checked_relative_rejects_escapes() {
        for bad in ["", "/etc/passwd", "../x.md", "Tasks/../../x.md", "a\\..\\b"] {
            assert!(
                matches!(checked_relative(bad), Err(PublishError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }
}
