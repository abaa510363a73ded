//! Google Drive v3 backend.
//!
//! Folders are addressed by id. The input folder is listed with pagination,
//! sources are downloaded with `alt=media`, artifacts are uploaded with a
//! single `multipart/related` request (updating a same-named file in place),
//! and archiving re-parents the source into the processed folder.
//!
//! Every request goes through the shared [`RetryPolicy`]: 5xx, 429 and
//! transport failures are retried with backoff, other 4xx fail the call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::auth::{AuthError, TokenProvider};
use super::local::{remove_if_present, write_atomic};
use super::{checked_relative, ListedItem, PublishError, RetrievalError, StorageBackend};
use crate::config::CloudSettings;
use crate::core::retry::{with_retry, RetryPolicy, Retryable};
use crate::core::safety::SafetyLimits;
use crate::domain::{
    Artifact, BackendKind, Destination, Fingerprint, ItemIdentity, StorageLocation,
};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size,modifiedTime,mimeType,md5Checksum)";

/// Errors from the Drive API
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for DriveError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Auth(_) | Self::Decode(_) | Self::Io(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Where vault documents go when running against Drive
#[derive(Debug, Clone)]
pub enum VaultTarget {
    /// Local directory (default)
    Local(PathBuf),
    /// Drive folder id
    Remote(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Drive-backed storage
pub struct CloudBackend {
    settings: CloudSettings,
    vault: VaultTarget,
    tokens: Arc<dyn TokenProvider>,
    limits: SafetyLimits,
    http: reqwest::Client,
    retry: RetryPolicy,
    /// "<root id>/<a>/<b>" -> folder id
    folders: Mutex<HashMap<String, String>>,
}

/// Escape a value for a Drive `q` string literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build a `multipart/related` upload body; returns (content type, body)
fn multipart_related(metadata: &serde_json::Value, mime: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("meetvault-{}", uuid::Uuid::new_v4().simple());
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = boundary,
            meta = metadata,
            mime = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/related; boundary={}", boundary), body)
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl CloudBackend {
    pub fn new(
        settings: CloudSettings,
        vault: VaultTarget,
        tokens: Arc<dyn TokenProvider>,
        limits: SafetyLimits,
    ) -> Result<Self, DriveError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            settings,
            vault,
            tokens,
            limits,
            http,
            retry: RetryPolicy::default(),
            folders: Mutex::new(HashMap::new()),
        })
    }

    /// Override the retry schedule (tests use an immediate policy)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn upload(&self, path: &str) -> String {
        format!("{}/{}", self.settings.upload_base.trim_end_matches('/'), path)
    }

    /// One authenticated request; non-2xx becomes `DriveError::Status`.
    /// A 401 refreshes the token and resends once.
    async fn attempt<F>(&self, build: &F) -> Result<Response, DriveError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let mut response = self.authorized(build).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("Access token rejected, refreshing");
            self.tokens.invalidate().await;
            response = self.authorized(build).await?;
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let retry_after = parse_retry_after(&response);
        let message = response.text().await.unwrap_or_default();
        Err(DriveError::Status {
            status: status.as_u16(),
            message: message.trim().chars().take(300).collect(),
            retry_after,
        })
    }

    async fn authorized<F>(&self, build: &F) -> Result<Response, DriveError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.access_token().await?;
        Ok(build(&self.http).bearer_auth(token).send().await?)
    }

    /// Send a request built fresh for every attempt, with auth and retry
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response, DriveError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let build = &build;
        with_retry(&self.retry, operation, |_| self.attempt(build)).await
    }

    async fn send_json<T, F>(&self, operation: &str, build: F) -> Result<T, DriveError>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(operation, build).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| DriveError::Decode(e.to_string()))
    }

    /// All children of a folder matching an extra query clause
    async fn list_children(&self, folder_id: &str, extra: &str) -> Result<Vec<DriveFile>, DriveError> {
        let mut query = format!("'{}' in parents and trashed=false", escape_query(folder_id));
        if !extra.is_empty() {
            query.push_str(" and ");
            query.push_str(extra);
        }

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.api("files");
            let page: FileList = self
                .send_json("list", |http| {
                    let mut params = vec![
                        ("q", query.clone()),
                        ("fields", LIST_FIELDS.to_string()),
                        ("pageSize", "100".to_string()),
                    ];
                    if let Some(token) = &page_token {
                        params.push(("pageToken", token.clone()));
                    }
                    http.get(&url).query(&params)
                })
                .await?;

            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn find_by_name(
        &self,
        folder_id: &str,
        name: &str,
        folders_only: bool,
    ) -> Result<Option<DriveFile>, DriveError> {
        let mut clause = format!("name = '{}'", escape_query(name));
        if folders_only {
            clause.push_str(&format!(" and mimeType = '{}'", FOLDER_MIME));
        }
        let mut found = self.list_children(folder_id, &clause).await?;
        Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, DriveError> {
        let url = self.api("files");
        let body = json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent_id] });
        let created: DriveFile = self
            .send_json("create_folder", |http| {
                http.post(&url).query(&[("fields", "id,name")]).json(&body)
            })
            .await?;
        tracing::info!(folder = %name, id = %created.id, "Created Drive folder");
        Ok(created.id)
    }

    /// Resolve nested folders under `root_id`, optionally creating them.
    /// The cache lock is held across the walk so concurrent publishers do
    /// not create twin folders.
    async fn resolve_folder(
        &self,
        root_id: &str,
        segments: &[&str],
        create: bool,
    ) -> Result<Option<String>, DriveError> {
        let mut cache = self.folders.lock().await;
        let mut current = root_id.to_string();
        let mut key = root_id.to_string();

        for segment in segments {
            key.push('/');
            key.push_str(segment);
            if let Some(id) = cache.get(&key) {
                current = id.clone();
                continue;
            }

            let id = match self.find_by_name(&current, segment, true).await? {
                Some(folder) => folder.id,
                None if create => self.create_folder(&current, segment).await?,
                None => return Ok(None),
            };
            cache.insert(key.clone(), id.clone());
            current = id;
        }
        Ok(Some(current))
    }

    fn remote_root(&self, destination: Destination) -> Option<&str> {
        match destination {
            Destination::Output => Some(&self.settings.output_folder_id),
            Destination::Vault => match &self.vault {
                VaultTarget::Remote(id) => Some(id),
                VaultTarget::Local(_) => None,
            },
        }
    }

    fn own_id<'a>(&self, location: &'a StorageLocation) -> Option<&'a str> {
        (location.backend() == BackendKind::Cloud).then(|| location.locator())
    }

    async fn upload_artifact(
        &self,
        root_id: &str,
        artifact: &Artifact,
    ) -> Result<String, DriveError> {
        let segments = artifact.parent_segments();
        let parent = self
            .resolve_folder(root_id, &segments, true)
            .await?
            .ok_or_else(|| DriveError::Decode("folder resolution returned nothing".to_string()))?;
        let name = artifact.file_name().to_string();
        let existing = self.find_by_name(&parent, &name, false).await?;

        let content = artifact.content.as_bytes();
        let mime = artifact.mime_type();
        let uploaded: DriveFile = match existing {
            Some(file) => {
                let url = self.upload(&format!("files/{}", file.id));
                let metadata = json!({ "name": name });
                self.send_json("update", |http| {
                    let (content_type, body) = multipart_related(&metadata, mime, content);
                    http.request(Method::PATCH, &url)
                        .query(&[("uploadType", "multipart"), ("fields", "id,name")])
                        .header(header::CONTENT_TYPE, content_type)
                        .body(body)
                })
                .await?
            }
            None => {
                let url = self.upload("files");
                let metadata = json!({ "name": name, "parents": [parent] });
                self.send_json("upload", |http| {
                    let (content_type, body) = multipart_related(&metadata, mime, content);
                    http.post(&url)
                        .query(&[("uploadType", "multipart"), ("fields", "id,name")])
                        .header(header::CONTENT_TYPE, content_type)
                        .body(body)
                })
                .await?
            }
        };
        Ok(uploaded.id)
    }

    async fn download(&self, file_id: &str, target: &Path) -> Result<(), DriveError> {
        let url = self.api(&format!("files/{}", file_id));
        let build = |http: &reqwest::Client| http.get(&url).query(&[("alt", "media")]);
        let build = &build;

        // The whole transfer is retried; a broken stream restarts from zero
        with_retry(&self.retry, "download", |_| async move {
            let mut response = self.attempt(build).await?;
            let mut file = tokio::fs::File::create(target).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), DriveError>(())
        })
        .await
    }
}

#[async_trait]
impl StorageBackend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn describe(&self) -> String {
        format!("drive:{}", self.settings.input_folder_id)
    }

    async fn list_new_items(&self) -> Result<Vec<ListedItem>, RetrievalError> {
        let files = self
            .list_children(&self.settings.input_folder_id, "")
            .await?;

        let mut items: Vec<ListedItem> = files
            .into_iter()
            .filter(|f| f.mime_type.as_deref() != Some(FOLDER_MIME))
            .filter(|f| self.limits.accepts(&f.name))
            .map(|f| ListedItem {
                location: StorageLocation::new(BackendKind::Cloud, f.id),
                size_bytes: f.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
                name: f.name,
                modified: f.modified_time,
                checksum: f.md5_checksum,
            })
            .collect();

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn identify(
        &self,
        item: &ListedItem,
    ) -> Result<(ItemIdentity, Fingerprint), RetrievalError> {
        let id = self
            .own_id(&item.location)
            .ok_or_else(|| RetrievalError::ForeignLocation(item.location.clone()))?;

        let fingerprint = match &item.checksum {
            Some(md5) if !md5.is_empty() => Fingerprint::md5(md5),
            _ => Fingerprint::from_metadata(
                BackendKind::Cloud.as_str(),
                &item.name,
                item.size_bytes,
            ),
        };
        Ok((ItemIdentity::from_native_id(BackendKind::Cloud, id), fingerprint))
    }

    async fn fetch(
        &self,
        location: &StorageLocation,
        into_dir: &Path,
    ) -> Result<PathBuf, RetrievalError> {
        let id = self
            .own_id(location)
            .ok_or_else(|| RetrievalError::ForeignLocation(location.clone()))?;

        let url = self.api(&format!("files/{}", id));
        let meta: DriveFile = match self
            .send_json("metadata", |http| http.get(&url).query(&[("fields", "id,name,size")]))
            .await
        {
            Ok(meta) => meta,
            Err(e) if e.status() == Some(404) => {
                return Err(RetrievalError::NotFound(location.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let file_name = crate::domain::sanitize_file_name(&meta.name);
        let target = into_dir.join(file_name);
        self.download(id, &target).await?;

        tracing::debug!(id, path = %target.display(), "Downloaded source");
        Ok(target)
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        destination: Destination,
    ) -> Result<StorageLocation, PublishError> {
        checked_relative(&artifact.relative_path)?;

        match self.remote_root(destination) {
            Some(root) => {
                let id = self.upload_artifact(root, artifact).await?;
                Ok(StorageLocation::new(BackendKind::Cloud, id))
            }
            None => {
                let VaultTarget::Local(root) = &self.vault else {
                    return Err(PublishError::InvalidPath(artifact.relative_path.clone()));
                };
                let root = root.clone();
                let relative = artifact.relative_path.clone();
                let content = artifact.content.clone().into_bytes();
                let written =
                    tokio::task::spawn_blocking(move || write_atomic(&root, &relative, &content))
                        .await
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
                Ok(StorageLocation::new(BackendKind::Local, written.to_string_lossy()))
            }
        }
    }

    async fn unpublish(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<(), PublishError> {
        let relative = checked_relative(relative_path)?;

        let Some(root) = self.remote_root(destination) else {
            if let VaultTarget::Local(dir) = &self.vault {
                remove_if_present(dir, relative)?;
            }
            return Ok(());
        };

        let mut segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some(name) = segments.pop() else {
            return Ok(());
        };
        let Some(parent) = self.resolve_folder(root, &segments, false).await? else {
            return Ok(());
        };
        if let Some(file) = self.find_by_name(&parent, name, false).await? {
            let url = self.api(&format!("files/{}", file.id));
            self.send("trash", |http| {
                http.request(Method::PATCH, &url)
                    .json(&json!({ "trashed": true }))
            })
            .await?;
        }
        Ok(())
    }

    async fn exists(
        &self,
        relative_path: &str,
        destination: Destination,
    ) -> Result<bool, PublishError> {
        let relative = checked_relative(relative_path)?;

        let Some(root) = self.remote_root(destination) else {
            return Ok(match &self.vault {
                VaultTarget::Local(dir) => tokio::fs::try_exists(dir.join(relative)).await?,
                VaultTarget::Remote(_) => false,
            });
        };

        let mut segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some(name) = segments.pop() else {
            return Ok(false);
        };
        let Some(parent) = self.resolve_folder(root, &segments, false).await? else {
            return Ok(false);
        };
        Ok(self.find_by_name(&parent, name, false).await?.is_some())
    }

    async fn archive(&self, location: &StorageLocation) -> Result<StorageLocation, PublishError> {
        let id = self
            .own_id(location)
            .ok_or_else(|| PublishError::ForeignLocation(location.clone()))?;

        let url = self.api(&format!("files/{}", id));
        let input = self.settings.input_folder_id.clone();
        let processed = self.settings.processed_folder_id.clone();
        self.send("archive", |http| {
            http.request(Method::PATCH, &url)
                .query(&[
                    ("addParents", processed.as_str()),
                    ("removeParents", input.as_str()),
                    ("fields", "id,parents"),
                ])
                .json(&json!({}))
        })
        .await?;

        Ok(StorageLocation::new(BackendKind::Cloud, id))
    }

    async fn health_check(&self) -> Result<(), RetrievalError> {
        let mut folders = vec![
            ("input", self.settings.input_folder_id.clone()),
            ("output", self.settings.output_folder_id.clone()),
            ("processed", self.settings.processed_folder_id.clone()),
        ];
        if let VaultTarget::Remote(id) = &self.vault {
            folders.push(("vault", id.clone()));
        }

        for (role, id) in folders {
            let url = self.api(&format!("files/{}", id));
            let folder: DriveFile = self
                .send_json("health_check", |http| {
                    http.get(&url).query(&[("fields", "id,name,mimeType")])
                })
                .await?;
            if folder.mime_type.as_deref() != Some(FOLDER_MIME) {
                return Err(DriveError::Decode(format!(
                    "{} folder id {} is not a folder",
                    role, id
                ))
                .into());
            }
        }

        if let VaultTarget::Local(dir) = &self.vault {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
