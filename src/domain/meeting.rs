//! Typed outputs passed between pipeline stages.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::task::{TaskCategory, TaskPriority};
use super::work_item::ItemIdentity;

/// The fixed pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    AudioExtraction,
    Transcription,
    Analysis,
    EntityDetection,
    TaskExtraction,
    NoteGeneration,
    DashboardRefresh,
}

impl StageKind {
    pub const ORDER: [StageKind; 7] = [
        StageKind::AudioExtraction,
        StageKind::Transcription,
        StageKind::Analysis,
        StageKind::EntityDetection,
        StageKind::TaskExtraction,
        StageKind::NoteGeneration,
        StageKind::DashboardRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioExtraction => "audio_extraction",
            Self::Transcription => "transcription",
            Self::Analysis => "analysis",
            Self::EntityDetection => "entity_detection",
            Self::TaskExtraction => "task_extraction",
            Self::NoteGeneration => "note_generation",
            Self::DashboardRefresh => "dashboard_refresh",
        }
    }

    /// Whether a failure in this stage fails the whole item
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DashboardRefresh)
    }

    /// 1-based position in the pipeline
    pub fn position(&self) -> usize {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0) + 1
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the meeting a stage is working on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRef {
    pub identity: ItemIdentity,

    /// Source file name
    pub source_name: String,

    /// Human title (file stem until analysis provides a better one)
    pub title: String,

    pub recorded_on: DateTime<Utc>,
}

impl MeetingRef {
    /// Vault-relative note path, e.g. `Meetings/2024-05-01 meeting1 (3fa2c1d0).md`
    pub fn note_path(&self, meetings_folder: &str) -> String {
        format!(
            "{}/{} {} ({}).md",
            meetings_folder,
            self.recorded_on.format("%Y-%m-%d"),
            sanitize_file_name(&self.title),
            self.identity.tag()
        )
    }

    /// Wiki-link target used by task documents
    pub fn link_target(&self, meetings_folder: &str) -> String {
        let path = self.note_path(meetings_folder);
        path.trim_end_matches(".md").to_string()
    }
}

/// Normalized audio produced by stage 1
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub format: String,
}

/// Transcript produced by stage 2
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
}

impl Transcript {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Structured analysis produced by stage 3
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingAnalysis {
    /// Better title than the file name, when the analyzer finds one
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub decisions: Vec<String>,

    #[serde(default)]
    pub action_items: Vec<ActionItem>,

    #[serde(default)]
    pub topics: Vec<String>,
}

/// A follow-up the analyzer found; becomes a `Task` in stage 5
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: TaskCategory,

    #[serde(default)]
    pub priority: TaskPriority,

    /// Names of people/companies/technologies mentioned with this item
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// Kind of entity referenced from a meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Company,
    Technology,
}

impl EntityKind {
    /// Vault folder holding records of this kind
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Person => "People",
            Self::Company => "Companies",
            Self::Technology => "Technologies",
        }
    }
}

/// Reference to a person, company or technology
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Obsidian wiki-link, e.g. `[[People/Ada Lovelace]]`
    pub fn wiki_link(&self) -> String {
        format!("[[{}/{}]]", self.kind.folder(), sanitize_file_name(&self.name))
    }
}

/// Output of stage 4
#[derive(Debug, Clone, Default)]
pub struct EntityDetection {
    pub entities: Vec<EntityRef>,

    /// New entity records the detector wants published to the vault
    pub records: Vec<Artifact>,
}

/// Replace characters that are unsafe in file names on common filesystems
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '#' | '^' | '[' | ']' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_fatality() {
        assert_eq!(StageKind::AudioExtraction.position(), 1);
        assert_eq!(StageKind::DashboardRefresh.position(), 7);
        assert!(StageKind::NoteGeneration.is_fatal());
        assert!(!StageKind::DashboardRefresh.is_fatal());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Q3: plan/review?"), "Q3- plan-review-");
        assert_eq!(sanitize_file_name("  ..  "), "untitled");
    }

    #[test]
    fn test_entity_wiki_link() {
        let person = EntityRef::new(EntityKind::Person, "Ada Lovelace");
        assert_eq!(person.wiki_link(), "[[People/Ada Lovelace]]");
    }

    #[test]
    fn test_analysis_parses_partial_json() {
        let json = r#"{"summary": "Kickoff", "action_items": [{"title": "Send deck", "priority": "high"}]}"#;
        let analysis: MeetingAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.summary, "Kickoff");
        assert_eq!(analysis.action_items.len(), 1);
        assert_eq!(analysis.action_items[0].priority, TaskPriority::High);
        assert_eq!(analysis.action_items[0].category, TaskCategory::Process);
        assert!(analysis.decisions.is_empty());
    }
}
