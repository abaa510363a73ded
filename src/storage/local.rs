//! Local filesystem backend.
//!
//! Input, output, processed and vault are plain directories. Publishing
//! writes a temp file in the target directory and renames it over the final
//! name, so readers never observe a partial artifact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::{
    checked_relative, ChangeFeed, ListedItem, PublishError, RetrievalError, StorageBackend,
};
use crate::core::safety::SafetyLimits;
use crate::domain::{
    Artifact, BackendKind, Destination, Fingerprint, ItemIdentity, StorageLocation,
};

/// Backend over mounted directories
#[derive(Debug, Clone)]
pub struct LocalBackend {
    input_dir: PathBuf,
    output_dir: PathBuf,
    processed_dir: PathBuf,
    vault_dir: PathBuf,
    limits: SafetyLimits,
}

impl LocalBackend {
    pub fn new(
        input_dir: PathBuf,
        output_dir: PathBuf,
        processed_dir: PathBuf,
        vault_dir: PathBuf,
        limits: SafetyLimits,
    ) -> Self {
        Self {
            input_dir,
            output_dir,
            processed_dir,
            vault_dir,
            limits,
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    fn root_for(&self, destination: Destination) -> &Path {
        match destination {
            Destination::Output => &self.output_dir,
            Destination::Vault => &self.vault_dir,
        }
    }

    fn own_path<'a>(&self, location: &'a StorageLocation) -> Option<&'a Path> {
        (location.backend() == BackendKind::Local).then(|| Path::new(location.locator()))
    }
}

/// Streaming SHA-256 of a file (hex)
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Write `content` to `root/relative_path` via temp file + rename
pub fn write_atomic(root: &Path, relative_path: &str, content: &[u8]) -> Result<PathBuf, PublishError> {
    let relative = checked_relative(relative_path)?;
    let target = root.join(relative);
    let parent = target
        .parent()
        .ok_or_else(|| PublishError::InvalidPath(relative_path.to_string()))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".meetvault-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| PublishError::Io(e.error))?;

    Ok(target)
}

/// Delete `root/relative_path` if present
pub fn remove_if_present(root: &Path, relative_path: &str) -> Result<(), PublishError> {
    let relative = checked_relative(relative_path)?;
    match std::fs::remove_file(root.join(relative)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// First free name in `dir` for `file_name`, suffixing a timestamp on collision
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    };
    dir.join(format!("{}_{}{}", stem, Utc::now().format("%Y%m%d_%H%M%S%3f"), ext))
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn describe(&self) -> String {
        format!("local:{}", self.input_dir.display())
    }

    async fn list_new_items(&self) -> Result<Vec<ListedItem>, RetrievalError> {
        let mut items = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.input_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.limits.accepts(&name) {
                continue;
            }

            // Files can vanish between readdir and stat
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }

            items.push(ListedItem {
                location: StorageLocation::new(
                    BackendKind::Local,
                    entry.path().to_string_lossy(),
                ),
                name,
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                checksum: None,
            });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn identify(
        &self,
        item: &ListedItem,
    ) -> Result<(ItemIdentity, Fingerprint), RetrievalError> {
        let path = self
            .own_path(&item.location)
            .ok_or_else(|| RetrievalError::ForeignLocation(item.location.clone()))?
            .to_path_buf();

        let digest = tokio::task::spawn_blocking(move || compute_file_hash(&path))
            .await
            .map_err(join_error)??;

        Ok((
            ItemIdentity::from_content_digest(BackendKind::Local, &digest),
            Fingerprint::sha256(&digest),
        ))
    }

    async fn fetch(
        &self,
        location: &StorageLocation,
        into_dir: &Path,
    ) -> Result<PathBuf, RetrievalError> {
        let source = self
            .own_path(location)
            .ok_or_else(|| RetrievalError::ForeignLocation(location.clone()))?;
        let file_name = source
            .file_name()
            .ok_or_else(|| RetrievalError::NotFound(location.clone()))?;
        let target = into_dir.join(file_name);

        match tokio::fs::copy(source, &target).await {
            Ok(_) => Ok(target),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RetrievalError::NotFound(location.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        destination: Destination,
    ) -> Result<StorageLocation, PublishError> {
        let root = self.root_for(destination).to_path_buf();
        let relative = artifact.relative_path.clone();
        let content = artifact.content.clone().into_bytes();

        let written = tokio::task::spawn_blocking(move || write_atomic(&root, &relative, &content))
            .await
            .map_err(join_error)??;

        Ok(StorageLocation::new(
            BackendKind::Local,
            written.to_string_lossy(),
        ))
    }

    async fn unpublish(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<(), PublishError> {
        remove_if_present(self.root_for(destination), relative_path)
    }

    async fn exists(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<bool, PublishError> {
        let relative = checked_relative(relative_path)?;
        Ok(tokio::fs::try_exists(self.root_for(destination).join(relative)).await?)
    }

    async fn archive(&self, location: &StorageLocation) -> Result<StorageLocation, PublishError> {
        let source = self
            .own_path(location)
            .ok_or_else(|| PublishError::ForeignLocation(location.clone()))?
            .to_path_buf();
        let processed_dir = self.processed_dir.clone();

        let moved = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            std::fs::create_dir_all(&processed_dir)?;
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "source".to_string());
            let target = unique_destination(&processed_dir, &file_name);
            move_file(&source, &target)?;
            Ok(target)
        })
        .await
        .map_err(join_error)??;

        Ok(StorageLocation::new(BackendKind::Local, moved.to_string_lossy()))
    }

    async fn health_check(&self) -> Result<(), RetrievalError> {
        for dir in [
            &self.input_dir,
            &self.output_dir,
            &self.processed_dir,
            &self.vault_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::read_dir(&self.input_dir).await?;
        Ok(())
    }

    fn subscribe(&self) -> Option<ChangeFeed> {
        let (tx, rx) = mpsc::channel::<()>(1);

        let debouncer = new_debouncer(Duration::from_secs(2), move |result: DebounceEventResult| {
            if let Ok(events) = result {
                if !events.is_empty() {
                    // A pending wake already covers this batch
                    let _ = tx.try_send(());
                }
            }
        });

        let mut debouncer = match debouncer {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "File notifications unavailable, polling only");
                return None;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&self.input_dir, RecursiveMode::NonRecursive)
        {
            tracing::warn!(
                dir = %self.input_dir.display(),
                error = %e,
                "Could not watch input directory, polling only"
            );
            return None;
        }

        Some(ChangeFeed::new(rx, Box::new(debouncer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactKind;
    use tempfile::TempDir;

    fn backend(temp: &TempDir) -> LocalBackend {
        LocalBackend::new(
            temp.path().join("input"),
            temp.path().join("output"),
            temp.path().join("processed"),
            temp.path().join("vault"),
            SafetyLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_listing_filters_patterns() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend.health_check().await.unwrap();

        let input = temp.path().join("input");
        std::fs::write(input.join("meeting1.mp4"), b"video").unwrap();
        std::fs::write(input.join("notes.txt"), b"text").unwrap();
        std::fs::write(input.join(".partial.mp4"), b"hidden").unwrap();
        std::fs::create_dir(input.join("nested.mp4")).unwrap();

        let items = backend.list_new_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "meeting1.mp4");
        assert_eq!(items[0].size_bytes, 5);
        assert!(items[0].modified.is_some());
    }

    #[tokio::test]
    async fn test_identity_follows_content() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend.health_check().await.unwrap();

        let input = temp.path().join("input");
        std::fs::write(input.join("a.mp4"), b"same bytes").unwrap();
        std::fs::write(input.join("b.mp4"), b"same bytes").unwrap();
        std::fs::write(input.join("c.mp4"), b"other bytes").unwrap();

        let items = backend.list_new_items().await.unwrap();
        let (id_a, fp_a) = backend.identify(&items[0]).await.unwrap();
        let (id_b, fp_b) = backend.identify(&items[1]).await.unwrap();
        let (id_c, _) = backend.identify(&items[2]).await.unwrap();

        assert_eq!(id_a, id_b);
        assert_eq!(fp_a, fp_b);
        assert_ne!(id_a, id_c);
        assert!(id_a.as_str().starts_with("local:"));
    }

    #[tokio::test]
    async fn test_publish_replaces_atomically() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);

        let first = Artifact::new("Meetings/x.md", ArtifactKind::MeetingNote, "v1".to_string());
        let second = Artifact::new("Meetings/x.md", ArtifactKind::MeetingNote, "v2".to_string());
        backend.publish(&first, Destination::Vault).await.unwrap();
        let location = backend.publish(&second, Destination::Vault).await.unwrap();

        let path = temp.path().join("vault/Meetings/x.md");
        assert_eq!(location.locator(), path.to_string_lossy());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");

        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("vault/Meetings"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_publish_rejects_escaping_paths() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let artifact = Artifact::new("../evil.md", ArtifactKind::MeetingNote, String::new());

        let result = backend.publish(&artifact, Destination::Output).await;
        assert!(matches!(result, Err(PublishError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_fetch_and_archive() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend.health_check().await.unwrap();

        let source = temp.path().join("input/meeting1.mp4");
        std::fs::write(&source, b"video").unwrap();
        let items = backend.list_new_items().await.unwrap();

        let scratch = TempDir::new().unwrap();
        let fetched = backend.fetch(&items[0].location, scratch.path()).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"video");

        let archived = backend.archive(&items[0].location).await.unwrap();
        assert!(!source.exists());
        assert!(Path::new(archived.locator()).exists());
        assert!(archived.locator().contains("processed"));

        let missing = backend.fetch(&items[0].location, scratch.path()).await;
        assert!(matches!(missing, Err(RetrievalError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_archive_does_not_overwrite_previous_copy() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend.health_check().await.unwrap();

        std::fs::write(temp.path().join("processed/meeting1.mp4"), b"old").unwrap();
        std::fs::write(temp.path().join("input/meeting1.mp4"), b"new").unwrap();
        let items = backend.list_new_items().await.unwrap();

        let archived = backend.archive(&items[0].location).await.unwrap();
        assert_ne!(
            Path::new(archived.locator()),
            temp.path().join("processed/meeting1.mp4")
        );
        assert_eq!(
            std::fs::read(temp.path().join("processed/meeting1.mp4")).unwrap(),
            b"old"
        );
    }

    #[tokio::test]
    async fn test_unpublish_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend
            .unpublish("Tasks/none.md", Destination::Vault)
            .await
            .unwrap();
    }
}
