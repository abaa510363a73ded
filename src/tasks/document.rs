//! Task documents: YAML frontmatter plus a Markdown body.
//!
//! ```text
//! ---
//! id: T-1a2b3c4d5e
//! title: Draft roadmap
//! status: in_progress
//! ...
//! ---
//!
//! # Draft roadmap
//!
//! <description>
//!
//! <!-- meetvault:links -->
//! - Meeting: [[Meetings/2024-05-01 Roadmap sync]]
//! ```
//!
//! The description is the free text between the title heading and the
//! links marker; everything else lives in the frontmatter.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    AuditEntry, EntityRef, ItemIdentity, Task, TaskCategory, TaskPriority, TaskStatus,
};

const LINKS_MARKER: &str = "<!-- meetvault:links -->";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("missing frontmatter")]
    MissingFrontmatter,

    #[error("invalid frontmatter: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    id: String,
    title: String,
    category: TaskCategory,
    priority: TaskPriority,
    status: TaskStatus,
    source_meeting: ItemIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meeting_note: Option<String>,
    #[serde(default)]
    linked_entities: BTreeSet<EntityRef>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    audit: Vec<AuditEntry>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Render a task as a vault document
pub fn render(task: &Task) -> Result<String, DocumentError> {
    let front = Frontmatter {
        id: task.id.clone(),
        title: task.title.clone(),
        category: task.category,
        priority: task.priority,
        status: task.status,
        source_meeting: task.source_meeting.clone(),
        meeting_note: task.meeting_note.clone(),
        linked_entities: task.linked_entities.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        audit: task.audit.clone(),
        tags: vec!["task".to_string(), task.category.to_string()],
    };
    let yaml = serde_yaml::to_string(&front)?;

    let mut out = String::new();
    let _ = write!(out, "---\n{}---\n\n# {}\n\n", yaml, task.title);
    if !task.description.trim().is_empty() {
        let _ = writeln!(out, "{}\n", task.description.trim());
    }
    let _ = writeln!(out, "{}", LINKS_MARKER);
    if let Some(note) = &task.meeting_note {
        let _ = writeln!(out, "- Meeting: [[{}]]", note);
    }
    if !task.linked_entities.is_empty() {
        let links: Vec<String> = task.linked_entities.iter().map(EntityRef::wiki_link).collect();
        let _ = writeln!(out, "- Related: {}", links.join(", "));
    }
    Ok(out)
}

/// Parse a vault document back into a task
pub fn parse(text: &str) -> Result<Task, DocumentError> {
    let text = text.trim_start_matches('\u{feff}');
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
        .ok_or(DocumentError::MissingFrontmatter)?;
    let end = rest
        .find("\n---")
        .ok_or(DocumentError::MissingFrontmatter)?;
    let yaml = &rest[..end + 1];
    let body = rest[end + 4..].trim_start_matches(['\r', '\n']);

    let front: Frontmatter = serde_yaml::from_str(yaml)?;
    let description = extract_description(body);

    Ok(Task {
        id: front.id,
        title: front.title,
        description,
        category: front.category,
        priority: front.priority,
        status: front.status,
        linked_entities: front.linked_entities,
        source_meeting: front.source_meeting,
        meeting_note: front.meeting_note,
        created_at: front.created_at,
        updated_at: front.updated_at,
        audit: front.audit,
    })
}

fn extract_description(body: &str) -> String {
    let body = match body.find(LINKS_MARKER) {
        Some(idx) => &body[..idx],
        None => body,
    };
    let body = body.trim_start();
    let body = match body.strip_prefix("# ") {
        Some(after_heading) => after_heading
            .split_once('\n')
            .map(|(_, rest)| rest)
            .unwrap_or(""),
        None => body,
    };
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityKind;

    fn sample() -> Task {
        let mut task = Task::new(
            "T-1a2b3c4d5e".to_string(),
            "Draft roadmap".to_string(),
            TaskCategory::Business,
            TaskPriority::High,
            ItemIdentity::new("local:abc"),
        );
        task.description = "Cover Q3 and Q4.\n\nInclude hiring.".to_string();
        task.meeting_note = Some("Meetings/2024-05-01 Roadmap sync".to_string());
        task.linked_entities
            .insert(EntityRef::new(EntityKind::Person, "Ada Lovelace"));
        task
    }

    #[test]
    fn test_document_layout() {
        let text = render(&sample()).unwrap();

        assert!(text.starts_with("---\nid: T-1a2b3c4d5e\n"));
        assert!(text.contains("\nstatus: new\n"));
        assert!(text.contains("# Draft roadmap\n\nCover Q3 and Q4."));
        assert!(text.contains("- Meeting: [[Meetings/2024-05-01 Roadmap sync]]"));
        assert!(text.contains("- Related: [[People/Ada Lovelace]]"));
    }

    #[test]
    fn test_parse_restores_task() {
        let mut task = sample();
        task.transition(TaskStatus::Ready, "groomed").unwrap();

        let parsed = parse(&render(&task).unwrap()).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_user_edited_description_is_kept() {
        let text = render(&sample())
            .unwrap()
            .replace("Include hiring.", "Include hiring and budget.");
        let parsed = parse(&text).unwrap();
        assert!(parsed.description.ends_with("Include hiring and budget."));
    }

    #[test]
    fn test_missing_frontmatter() {
        assert!(matches!(
            parse("# Just a note"),
            Err(DocumentError::MissingFrontmatter)
        ));
    }
}
