//! Built-in Markdown rendering for the vault.
//!
//! - Meeting notes (`Meetings/<date> <title> (<tag>).md`)
//! - Entity records (`People/`, `Companies/`, `Technologies/`)
//! - The task dashboard (see [`dashboard`])

pub mod dashboard;

use std::fmt::Write as _;

use anyhow::Result;

use crate::adapters::NoteGenerator;
use crate::config::paths;
use crate::domain::{
    sanitize_file_name, Artifact, ArtifactKind, EntityRef, MeetingAnalysis, MeetingRef, Task,
};

pub use dashboard::TaskDashboard;

/// Obsidian link to a task by id; resolves whether active or archived
pub fn task_link(task: &Task) -> String {
    format!("[[{}|{}]]", task.id, task.title.replace(['[', ']', '|'], ""))
}

/// Stub record for an entity. Backlinks from meeting notes carry the history.
pub fn entity_record(entity: &EntityRef) -> Artifact {
    let kind = match entity.kind {
        crate::domain::EntityKind::Person => "person",
        crate::domain::EntityKind::Company => "company",
        crate::domain::EntityKind::Technology => "technology",
    };
    let name = sanitize_file_name(&entity.name);
    let content = format!(
        "---\ntype: {kind}\nname: \"{}\"\ntags: [{kind}]\n---\n\n# {}\n\nMeetings that mention {} link here.\n",
        entity.name.replace('"', "'"),
        entity.name,
        entity.name,
    );
    Artifact::new(
        format!("{}/{}.md", entity.kind.folder(), name),
        ArtifactKind::EntityRecord,
        content,
    )
}

fn bullet_list(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str("_None recorded._\n");
    }
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Default meeting note renderer
#[derive(Debug, Default, Clone)]
pub struct MarkdownNoteGenerator;

impl MarkdownNoteGenerator {
    pub fn render_note(
        meeting: &MeetingRef,
        analysis: &MeetingAnalysis,
        tasks: &[Task],
        entities: &[EntityRef],
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "---");
        let _ = writeln!(out, "type: meeting");
        let _ = writeln!(out, "date: {}", meeting.recorded_on.format("%Y-%m-%d"));
        let _ = writeln!(out, "source: \"{}\"", meeting.source_name.replace('"', "'"));
        let _ = writeln!(out, "identity: {}", meeting.identity);
        let _ = writeln!(out, "tasks: {}", tasks.len());
        let _ = writeln!(out, "tags: [meeting]");
        let _ = writeln!(out, "---\n");
        let _ = writeln!(out, "# {}\n", meeting.title);

        out.push_str("## Summary\n\n");
        if analysis.summary.trim().is_empty() {
            out.push_str("_No summary available._\n");
        } else {
            let _ = writeln!(out, "{}", analysis.summary.trim());
        }

        out.push_str("\n## Decisions\n\n");
        bullet_list(&mut out, &analysis.decisions);

        out.push_str("\n## Action Items\n\n");
        if tasks.is_empty() {
            out.push_str("_None recorded._\n");
        }
        for task in tasks {
            let _ = writeln!(
                out,
                "- [ ] {} ({}, {})",
                task_link(task),
                task.priority,
                task.category
            );
        }

        out.push_str("\n## Topics\n\n");
        bullet_list(&mut out, &analysis.topics);

        out.push_str("\n## Mentioned\n\n");
        let links: Vec<String> = entities.iter().map(EntityRef::wiki_link).collect();
        bullet_list(&mut out, &links);

        out
    }
}

impl NoteGenerator for MarkdownNoteGenerator {
    fn render(
        &self,
        meeting: &MeetingRef,
        analysis: &MeetingAnalysis,
        tasks: &[Task],
        entities: &[EntityRef],
    ) -> Result<Vec<Artifact>> {
        let content = Self::render_note(meeting, analysis, tasks, entities);
        Ok(vec![Artifact::new(
            meeting.note_path(paths::MEETINGS),
            ArtifactKind::MeetingNote,
            content,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, ItemIdentity, TaskCategory, TaskPriority};
    use chrono::TimeZone;

    fn meeting() -> MeetingRef {
        MeetingRef {
            identity: ItemIdentity::new("local:abc"),
            source_name: "meeting1.mp4".to_string(),
            title: "Roadmap sync".to_string(),
            recorded_on: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_meeting_note_layout() {
        let analysis = MeetingAnalysis {
            summary: "Planned Q3.".to_string(),
            decisions: vec!["Ship in July".to_string()],
            ..MeetingAnalysis::default()
        };
        let task = Task::new(
            "T-1a2b".to_string(),
            "Draft roadmap".to_string(),
            TaskCategory::Business,
            TaskPriority::High,
            ItemIdentity::new("local:abc"),
        );
        let entities = vec![EntityRef::new(EntityKind::Person, "Ada Lovelace")];

        let artifacts = MarkdownNoteGenerator
            .render(&meeting(), &analysis, &[task], &entities)
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        let note = &artifacts[0];
        assert_eq!(
            note.relative_path,
            format!("Meetings/2024-05-01 Roadmap sync ({}).md", meeting().identity.tag())
        );
        assert!(note.content.starts_with("---\ntype: meeting\ndate: 2024-05-01"));
        assert!(note.content.contains("- Ship in July"));
        assert!(note.content.contains("- [ ] [[T-1a2b|Draft roadmap]] (high, business)"));
        assert!(note.content.contains("[[People/Ada Lovelace]]"));
    }

    #[test]
    fn test_entity_record_path() {
        let record = entity_record(&EntityRef::new(EntityKind::Technology, "CI/CD"));
        assert_eq!(record.relative_path, "Technologies/CI-CD.md");
        assert_eq!(record.kind, ArtifactKind::EntityRecord);
        assert!(record.content.contains("type: technology"));
    }
}
