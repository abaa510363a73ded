//! Domain types for the meetvault orchestrator.
//!
//! This module contains the core data structures:
//! - WorkItem: a discovered meeting file and its processing state
//! - Meeting: typed outputs passed between pipeline stages
//! - Task: follow-up work and its lifecycle
//! - Artifact: documents ready to publish

pub mod artifact;
pub mod meeting;
pub mod task;
pub mod work_item;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKind, Destination};
pub use meeting::{
    sanitize_file_name, ActionItem, AudioArtifact, EntityDetection, EntityKind, EntityRef,
    MeetingAnalysis, MeetingRef, StageKind, Transcript,
};
pub use task::{AuditEntry, InvalidTransition, Task, TaskCategory, TaskPriority, TaskStatus};
pub use work_item::{
    BackendKind, Fingerprint, ItemFailure, ItemIdentity, StorageLocation, WorkItem, WorkItemState,
};
