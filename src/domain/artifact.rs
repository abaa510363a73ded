//! Artifacts produced by pipeline stages.
//!
//! An artifact is a named document ready to be published to one of the
//! storage destinations. Its path is relative to that destination's root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document produced by a pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the destination root, `/`-separated
    pub relative_path: String,

    /// Type of artifact
    pub kind: ArtifactKind,

    /// Document body
    pub content: String,

    /// When the artifact was created
    pub created_at: DateTime<Utc>,

    /// Size in bytes (for tracking)
    pub size_bytes: u64,
}

impl Artifact {
    /// Create a new artifact
    pub fn new(relative_path: impl Into<String>, kind: ArtifactKind, content: String) -> Self {
        let size_bytes = content.len() as u64;
        Self {
            relative_path: relative_path.into(),
            kind,
            content,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    /// Last path component
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// Folder components leading to the file, outermost first
    pub fn parent_segments(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self
            .relative_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        segments.pop();
        segments
    }

    /// MIME type used for remote uploads
    pub fn mime_type(&self) -> &'static str {
        if self.relative_path.ends_with(".json") {
            "application/json"
        } else if self.relative_path.ends_with(".md") {
            "text/markdown"
        } else {
            "text/plain"
        }
    }
}

/// Types of artifacts that can be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Plain-text transcript
    Transcript,

    /// Structured analysis (JSON)
    Analysis,

    /// Meeting note in the vault
    MeetingNote,

    /// Person/company/technology record
    EntityRecord,

    /// Persisted task document
    TaskDocument,

    /// Analytics dashboard
    Dashboard,

    /// Failure report for an item
    ErrorReport,
}

/// Where an artifact is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Output location (transcripts, analysis, error reports)
    Output,

    /// Knowledge vault (notes, entities, tasks, dashboards)
    Vault,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Vault => "vault",
        }
    }
}
