//! Pipeline stages.
//!
//! Each stage reads what earlier stages left in [`MeetingContext`] and adds
//! its own output. Stages never publish anything; the commit phase in
//! [`super::pipeline`] does that once all of them succeeded.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::adapters::{AudioExtractor, Analyzer, EntityDetector, NoteGenerator, Transcriber};
use crate::config::paths;
use crate::domain::{
    Artifact, AudioArtifact, EntityDetection, EntityRef, MeetingAnalysis, MeetingRef, StageKind,
    Task, Transcript, WorkItem,
};
use crate::tasks::derive_task_id;

/// A stage failed; fatal for the item
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {cause}")]
pub struct StageError {
    pub stage: StageKind,
    pub cause: String,
}

impl StageError {
    pub fn new(stage: StageKind, cause: impl Into<String>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    fn from_anyhow(stage: StageKind, error: anyhow::Error) -> Self {
        Self::new(stage, format!("{:#}", error))
    }

    fn missing(stage: StageKind, what: &str) -> Self {
        Self::new(stage, format!("{} not available", what))
    }
}

/// Everything known about one meeting during a pipeline run
#[derive(Debug)]
pub struct MeetingContext {
    pub item: WorkItem,
    pub meeting: MeetingRef,

    /// Fetched copy of the source inside the worker directory
    pub source_path: PathBuf,

    /// Worker-private scratch directory
    pub workdir: PathBuf,

    /// Deadline handed to external collaborators
    pub stage_timeout: Duration,

    pub audio: Option<AudioArtifact>,
    pub transcript: Option<Transcript>,
    pub analysis: Option<MeetingAnalysis>,
    pub entities: Option<EntityDetection>,
    pub tasks: Vec<Task>,
    pub notes: Vec<Artifact>,
}

impl MeetingContext {
    pub fn new(
        item: WorkItem,
        source_path: PathBuf,
        workdir: PathBuf,
        stage_timeout: Duration,
    ) -> Self {
        let meeting = MeetingRef {
            identity: item.identity.clone(),
            source_name: item.name.clone(),
            title: item.stem().to_string(),
            recorded_on: item.discovered_at,
        };
        Self {
            item,
            meeting,
            source_path,
            workdir,
            stage_timeout,
            audio: None,
            transcript: None,
            analysis: None,
            entities: None,
            tasks: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn transcript(&self, stage: StageKind) -> Result<&Transcript, StageError> {
        self.transcript
            .as_ref()
            .ok_or_else(|| StageError::missing(stage, "transcript"))
    }

    fn analysis(&self, stage: StageKind) -> Result<&MeetingAnalysis, StageError> {
        self.analysis
            .as_ref()
            .ok_or_else(|| StageError::missing(stage, "analysis"))
    }

    pub fn entity_refs(&self) -> &[EntityRef] {
        self.entities
            .as_ref()
            .map(|e| e.entities.as_slice())
            .unwrap_or(&[])
    }
}

/// Uniform stage contract
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError>;
}

pub struct AudioExtractionStage(pub Arc<dyn AudioExtractor>);

#[async_trait]
impl Stage for AudioExtractionStage {
    fn kind(&self) -> StageKind {
        StageKind::AudioExtraction
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let audio = self
            .0
            .extract(&ctx.source_path, &ctx.workdir, ctx.stage_timeout)
            .await
            .map_err(|e| StageError::from_anyhow(self.kind(), e))?;
        ctx.audio = Some(audio);
        Ok(())
    }
}

pub struct TranscriptionStage(pub Arc<dyn Transcriber>);

#[async_trait]
impl Stage for TranscriptionStage {
    fn kind(&self) -> StageKind {
        StageKind::Transcription
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let audio = ctx
            .audio
            .as_ref()
            .ok_or_else(|| StageError::missing(self.kind(), "audio"))?;
        let transcript = self
            .0
            .transcribe(audio, ctx.stage_timeout)
            .await
            .map_err(|e| StageError::from_anyhow(self.kind(), e))?;
        if transcript.text.trim().is_empty() {
            return Err(StageError::new(self.kind(), "transcript is empty"));
        }
        ctx.transcript = Some(transcript);
        Ok(())
    }
}

pub struct AnalysisStage(pub Arc<dyn Analyzer>);

#[async_trait]
impl Stage for AnalysisStage {
    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let transcript = ctx.transcript(self.kind())?;
        let analysis = self
            .0
            .analyze(transcript, ctx.stage_timeout)
            .await
            .map_err(|e| StageError::from_anyhow(self.kind(), e))?;

        if let Some(title) = analysis.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                ctx.meeting.title = title.to_string();
            }
        }
        ctx.analysis = Some(analysis);
        Ok(())
    }
}

pub struct EntityDetectionStage(pub Arc<dyn EntityDetector>);

#[async_trait]
impl Stage for EntityDetectionStage {
    fn kind(&self) -> StageKind {
        StageKind::EntityDetection
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let detection = self
            .0
            .detect(
                ctx.transcript(self.kind())?,
                ctx.analysis(self.kind())?,
                ctx.stage_timeout,
            )
            .await
            .map_err(|e| StageError::from_anyhow(self.kind(), e))?;
        ctx.entities = Some(detection);
        Ok(())
    }
}

/// Turns analysis action items into `new` tasks. No external collaborator.
pub struct TaskExtractionStage;

impl TaskExtractionStage {
    /// Entities whose name appears in the item's mentions, title or description
    fn linked_entities(
        item: &crate::domain::ActionItem,
        entities: &[EntityRef],
    ) -> BTreeSet<EntityRef> {
        let haystack = format!("{} {}", item.title, item.description).to_lowercase();
        entities
            .iter()
            .filter(|entity| {
                let name = entity.name.to_lowercase();
                item.mentions.iter().any(|m| m.trim().to_lowercase() == name)
                    || haystack.contains(&name)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Stage for TaskExtractionStage {
    fn kind(&self) -> StageKind {
        StageKind::TaskExtraction
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let analysis = ctx.analysis(self.kind())?;
        let note_link = ctx.meeting.link_target(paths::MEETINGS);
        let entities = ctx.entity_refs();

        let tasks: Vec<Task> = analysis
            .action_items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.title.trim().is_empty())
            .map(|(index, item)| {
                let mut task = Task::new(
                    derive_task_id(&ctx.meeting.identity, index, &item.title),
                    item.title.trim().to_string(),
                    item.category,
                    item.priority,
                    ctx.meeting.identity.clone(),
                );
                task.description = item.description.trim().to_string();
                task.meeting_note = Some(note_link.clone());
                task.linked_entities = Self::linked_entities(item, entities);
                task
            })
            .collect();

        ctx.tasks = tasks;
        Ok(())
    }
}

pub struct NoteGenerationStage(pub Arc<dyn NoteGenerator>);

#[async_trait]
impl Stage for NoteGenerationStage {
    fn kind(&self) -> StageKind {
        StageKind::NoteGeneration
    }

    async fn run(&self, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let notes = self
            .0
            .render(
                &ctx.meeting,
                ctx.analysis(self.kind())?,
                &ctx.tasks,
                ctx.entity_refs(),
            )
            .map_err(|e| StageError::from_anyhow(self.kind(), e))?;
        if notes.is_empty() {
            return Err(StageError::new(self.kind(), "note generator produced nothing"));
        }
        ctx.notes = notes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ActionItem, BackendKind, EntityKind, Fingerprint, ItemIdentity, StorageLocation,
        TaskCategory, TaskPriority,
    };

    fn context() -> MeetingContext {
        let item = WorkItem::discovered(
            ItemIdentity::new("local:abc"),
            Fingerprint::sha256("abc"),
            StorageLocation::new(BackendKind::Local, "/in/meeting1.mp4"),
            "meeting1.mp4",
            10,
        );
        MeetingContext::new(
            item,
            PathBuf::from("/work/meeting1.mp4"),
            PathBuf::from("/work"),
            Duration::from_secs(5),
        )
    }

    fn action(title: &str, mentions: &[&str]) -> ActionItem {
        ActionItem {
            title: title.to_string(),
            description: String::new(),
            category: TaskCategory::Technical,
            priority: TaskPriority::High,
            mentions: mentions.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_task_extraction_builds_linked_tasks() {
        let mut ctx = context();
        ctx.meeting.title = "Roadmap sync".to_string();
        ctx.analysis = Some(MeetingAnalysis {
            action_items: vec![
                action("Migrate to Postgres", &[]),
                action("Call the vendor", &["Ada Lovelace"]),
                action("   ", &[]),
            ],
            ..MeetingAnalysis::default()
        });
        ctx.entities = Some(EntityDetection {
            entities: vec![
                EntityRef::new(EntityKind::Person, "Ada Lovelace"),
                EntityRef::new(EntityKind::Technology, "Postgres"),
            ],
            records: Vec::new(),
        });

        TaskExtractionStage.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.tasks.len(), 2);
        let postgres = &ctx.tasks[0];
        assert_eq!(postgres.status, crate::domain::TaskStatus::New);
        assert_eq!(postgres.priority, TaskPriority::High);
        assert!(postgres
            .linked_entities
            .contains(&EntityRef::new(EntityKind::Technology, "Postgres")));
        assert!(ctx.tasks[1]
            .linked_entities
            .contains(&EntityRef::new(EntityKind::Person, "Ada Lovelace")));
        assert!(ctx.tasks[0]
            .meeting_note
            .as_deref()
            .unwrap()
            .ends_with("Roadmap sync"));

        // Same input, same ids
        let first_ids: Vec<String> = ctx.tasks.iter().map(|t| t.id.clone()).collect();
        TaskExtractionStage.run(&mut ctx).await.unwrap();
        let second_ids: Vec<String> = ctx.tasks.iter().map(|t| t.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_stage_without_input_fails() {
        let mut ctx = context();
        let err = TaskExtractionStage.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.stage, StageKind::TaskExtraction);
        assert!(err.cause.contains("analysis"));
    }
}
