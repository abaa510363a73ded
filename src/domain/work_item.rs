//! Work items: one discovered meeting file moving through the pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::meeting::StageKind;

/// Stable key used to detect an item across restarts.
///
/// Local items are keyed by content hash, cloud items by their remote file id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemIdentity(String);

impl ItemIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identity derived from a content digest (first 16 hex chars)
    pub fn from_content_digest(backend: BackendKind, digest_hex: &str) -> Self {
        let short = &digest_hex[..digest_hex.len().min(16)];
        Self(format!("{}:{}", backend, short))
    }

    /// Identity derived from a backend-native id
    pub fn from_native_id(backend: BackendKind, native_id: &str) -> Self {
        Self(format!("{}:{}", backend, native_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs and file names
    pub fn short(&self) -> &str {
        let start = self.0.find(':').map(|i| i + 1).unwrap_or(0);
        let end = (start + 8).min(self.0.len());
        &self.0[start..end]
    }

    /// Eight hex chars of the identity's digest, used to keep derived file
    /// names apart when two sources share a name
    pub fn tag(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Duplicate-detection fingerprint.
///
/// Prefer a content digest; fall back to the `(source, name, size)` tuple when
/// the backend cannot provide one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 content digest (hex)
    pub fn sha256(digest_hex: impl AsRef<str>) -> Self {
        Self(format!("sha256:{}", digest_hex.as_ref()))
    }

    /// MD5 checksum reported by a remote store
    pub fn md5(checksum: impl AsRef<str>) -> Self {
        Self(format!("md5:{}", checksum.as_ref()))
    }

    /// Metadata fallback when no content digest exists
    pub fn from_metadata(source: &str, name: &str, size: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(size.to_le_bytes());
        Self(format!("meta:{}", hex::encode(&hasher.finalize()[..12])))
    }

    /// Rehydrate from storage
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when derived from actual content rather than metadata
    pub fn is_content_based(&self) -> bool {
        !self.0.starts_with("meta:")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which storage system a location belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Cloud,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Cloud => "drive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "drive" | "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque backend-specific handle.
///
/// Only the backend that produced a location interprets its locator; the
/// orchestrator passes it around untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    backend: BackendKind,
    locator: String,
}

impl StorageLocation {
    pub fn new(backend: BackendKind, locator: impl Into<String>) -> Self {
        Self {
            backend,
            locator: locator.into(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.backend, self.locator)
    }
}

/// Processing state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    Discovered,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl WorkItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Forward-only transitions; Failed → Queued is the explicit retry path.
    ///
    /// Processing → Queued is not listed here: it is only legal during startup
    /// recovery and the registry performs it directly.
    pub fn can_transition_to(&self, next: WorkItemState) -> bool {
        use WorkItemState::*;
        matches!(
            (self, next),
            (Discovered, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Queued)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cause recorded when an item fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemFailure {
    #[error("retrieval failed: {cause}")]
    Retrieval { cause: String },

    #[error("stage '{stage}' failed: {cause}")]
    Stage { stage: StageKind, cause: String },

    #[error("publish failed: {cause}")]
    Publish { cause: String },

    #[error("rejected before processing: {reason}")]
    Rejected { reason: String },

    #[error("interrupted by shutdown")]
    Shutdown,

    #[error("worker panicked: {message}")]
    Panicked { message: String },
}

impl ItemFailure {
    /// Stage name to persist alongside the error, if any
    pub fn stage_label(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage.as_str()),
            Self::Retrieval { .. } => Some("fetch"),
            Self::Publish { .. } => Some("publish"),
            Self::Rejected { .. } => Some("validate"),
            Self::Shutdown => Some("shutdown"),
            Self::Panicked { .. } => None,
        }
    }
}

/// A discovered source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub identity: ItemIdentity,

    pub fingerprint: Fingerprint,

    pub location: StorageLocation,

    /// Original file name
    pub name: String,

    pub size_bytes: u64,

    pub state: WorkItemState,

    pub attempt_count: u32,

    pub last_error: Option<String>,

    pub discovered_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// A freshly discovered item
    pub fn discovered(
        identity: ItemIdentity,
        fingerprint: Fingerprint,
        location: StorageLocation,
        name: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            identity,
            fingerprint,
            location,
            name: name.into(),
            size_bytes,
            state: WorkItemState::Discovered,
            attempt_count: 0,
            last_error: None,
            discovered_at: Utc::now(),
            completed_at: None,
        }
    }

    /// File stem, used for naming derived artifacts
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }

    /// Base name for output artifacts: `<stem>_<identity tag>`
    pub fn output_stem(&self) -> String {
        format!("{}_{}", self.stem(), self.identity.tag())
    }
}
