//! Tasks extracted from meetings and their Agile-style lifecycle.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::meeting::EntityRef;
use super::work_item::ItemIdentity;

/// Workflow status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Ready,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::New,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
        }
    }

    /// Allowed moves. `done` is only reachable through review.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (New, Ready)
                | (Ready, InProgress)
                | (InProgress, InReview)
                | (InReview, Done)
                | (InReview, InProgress)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "new" => Ok(Self::New),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "in_review" => Ok(Self::InReview),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown task priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Technical,
    Business,
    Process,
    Documentation,
    Research,
}

impl Default for TaskCategory {
    fn default() -> Self {
        Self::Process
    }
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Business => "business",
            Self::Process => "process",
            Self::Documentation => "documentation",
            Self::Research => "research",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "technical" => Ok(Self::Technical),
            "business" => Ok(Self::Business),
            "process" => Ok(Self::Process),
            "documentation" => Ok(Self::Documentation),
            "research" => Ok(Self::Research),
            other => Err(format!("unknown task category: {}", other)),
        }
    }
}

/// One row of a task's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task transition for {task_id}: {from} → {to}")]
pub struct InvalidTransition {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Unit of follow-up work extracted from a meeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub category: TaskCategory,

    pub priority: TaskPriority,

    pub status: TaskStatus,

    #[serde(default)]
    pub linked_entities: BTreeSet<EntityRef>,

    /// Identity of the meeting the task came from
    pub source_meeting: ItemIdentity,

    /// Vault link to the meeting note
    #[serde(default)]
    pub meeting_note: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl Task {
    /// A task in state `new`, with the creation recorded in the audit trail
    pub fn new(
        id: String,
        title: String,
        category: TaskCategory,
        priority: TaskPriority,
        source_meeting: ItemIdentity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            description: String::new(),
            category,
            priority,
            status: TaskStatus::New,
            linked_entities: BTreeSet::new(),
            source_meeting,
            meeting_note: None,
            created_at: now,
            updated_at: now,
            audit: vec![AuditEntry {
                status: TaskStatus::New,
                at: now,
                reason: "extracted from meeting".to_string(),
            }],
        }
    }

    /// Apply a status change. On rejection nothing is modified.
    pub fn transition(&mut self, next: TaskStatus, reason: &str) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        self.audit.push(AuditEntry {
            status: next,
            at: now,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new(
            "T-1".to_string(),
            "Send deck".to_string(),
            TaskCategory::Business,
            TaskPriority::High,
            ItemIdentity::new("local:abc"),
        )
    }

    #[test]
    fn test_review_gate() {
        use TaskStatus::*;
        for from in [New, Ready, InProgress] {
            assert!(!from.can_transition_to(Done), "{} must not jump to done", from);
        }
        assert!(InReview.can_transition_to(Done));
        assert!(InReview.can_transition_to(InProgress));
        assert!(!Done.can_transition_to(InReview));
    }

    #[test]
    fn test_transition_appends_audit() {
        let mut task = sample_task();
        let created = task.updated_at;

        task.transition(TaskStatus::Ready, "groomed").unwrap();

        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.audit.len(), 2);
        assert_eq!(task.audit[1].reason, "groomed");
        assert!(task.updated_at >= created);
    }

    #[test]
    fn test_rejected_transition_leaves_task_untouched() {
        let mut task = sample_task();
        let before = task.clone();

        let err = task.transition(TaskStatus::Done, "skip review").unwrap_err();

        assert_eq!(err.from, TaskStatus::New);
        assert_eq!(err.to, TaskStatus::Done);
        assert_eq!(task, before);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("In_Review".parse::<TaskStatus>().unwrap(), TaskStatus::InReview);
        assert!("blocked".parse::<TaskStatus>().is_err());
    }
}
