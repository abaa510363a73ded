//! Per-item pipeline: validate, fetch, run the stages, commit.
//!
//! The commit phase only starts once every fatal stage succeeded, so a
//! failed item leaves no meeting note, no tasks and an unarchived source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::safety::SafetyLimits;
use super::stages::{
    AnalysisStage, AudioExtractionStage, EntityDetectionStage, MeetingContext,
    NoteGenerationStage, Stage, StageError, TaskExtractionStage, TranscriptionStage,
};
use crate::adapters::{
    Analyzer, AudioExtractor, DashboardRefresher, EntityDetector, FabricAnalyzer, FabricClient,
    FabricEntityDetector, FfmpegExtractor, NoteGenerator, Transcriber, WhisperTranscriber,
};
use crate::config::ToolSettings;
use crate::domain::{
    Artifact, ArtifactKind, Destination, ItemFailure, StageKind, StorageLocation, WorkItem,
};
use crate::notes::{MarkdownNoteGenerator, TaskDashboard};
use crate::storage::StorageBackend;
use crate::tasks::TaskManager;

/// Stage collaborators, one per external concern
#[derive(Clone)]
pub struct Collaborators {
    pub audio: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn Analyzer>,
    pub entities: Arc<dyn EntityDetector>,
    pub notes: Arc<dyn NoteGenerator>,
    pub dashboard: Arc<dyn DashboardRefresher>,
}

impl Collaborators {
    /// Subprocess tools plus the built-in renderers
    pub fn from_tools(tools: &ToolSettings) -> Self {
        let fabric = FabricClient::new(tools.fabric_path.clone());
        Self {
            audio: Arc::new(FfmpegExtractor::new(tools.ffmpeg_path.clone())),
            transcriber: Arc::new(WhisperTranscriber::new(
                tools.whisper_path.clone(),
                tools.whisper_model.clone(),
            )),
            analyzer: Arc::new(FabricAnalyzer::new(
                fabric.clone(),
                tools.analysis_pattern.clone(),
            )),
            entities: Arc::new(FabricEntityDetector::new(fabric, tools.entity_pattern.clone())),
            notes: Arc::new(MarkdownNoteGenerator),
            dashboard: Arc::new(TaskDashboard),
        }
    }
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub title: String,
    pub tasks_created: usize,
    pub artifacts_published: usize,
    pub archived_to: StorageLocation,
}

/// The fixed stage sequence plus the commit phase
pub struct Pipeline {
    backend: Arc<dyn StorageBackend>,
    tasks: Arc<TaskManager>,
    stages: Vec<Box<dyn Stage>>,
    dashboard: Arc<dyn DashboardRefresher>,
    limits: SafetyLimits,
    work_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        tasks: Arc<TaskManager>,
        collaborators: Collaborators,
        limits: SafetyLimits,
        work_root: PathBuf,
    ) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(AudioExtractionStage(collaborators.audio)),
            Box::new(TranscriptionStage(collaborators.transcriber)),
            Box::new(AnalysisStage(collaborators.analyzer)),
            Box::new(EntityDetectionStage(collaborators.entities)),
            Box::new(TaskExtractionStage),
            Box::new(NoteGenerationStage(collaborators.notes)),
        ];
        Self {
            backend,
            tasks,
            stages,
            dashboard: collaborators.dashboard,
            limits,
            work_root,
        }
    }

    /// Fatal stages in execution order
    pub fn stage_order(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Run one item end to end
    #[instrument(
        skip(self, item),
        fields(identity = %item.identity, name = %item.name, attempt = item.attempt_count)
    )]
    pub async fn process(&self, item: &WorkItem) -> Result<ProcessOutcome, ItemFailure> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, size = item.size_bytes, "Processing started");

        self.limits
            .validate_source(&item.name, item.size_bytes)
            .map_err(|violation| ItemFailure::Rejected {
                reason: violation.to_string(),
            })?;

        // Removed on drop, whatever the outcome
        let workdir = self.create_workdir(item).await?;

        let source_path = self
            .backend
            .fetch(&item.location, workdir.path())
            .await
            .map_err(|e| ItemFailure::Retrieval {
                cause: e.to_string(),
            })?;

        let mut ctx = MeetingContext::new(
            item.clone(),
            source_path,
            workdir.path().to_path_buf(),
            self.limits.stage_timeout(),
        );

        for stage in &self.stages {
            self.run_stage(stage.as_ref(), &mut ctx).await.map_err(|e| {
                ItemFailure::Stage {
                    stage: e.stage,
                    cause: e.cause,
                }
            })?;
        }

        let outcome = self.commit(&ctx).await?;
        self.refresh_dashboard().await;

        info!(
            %run_id,
            title = %outcome.title,
            tasks_created = outcome.tasks_created,
            artifacts = outcome.artifacts_published,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processing completed"
        );
        Ok(outcome)
    }

    async fn create_workdir(&self, item: &WorkItem) -> Result<tempfile::TempDir, ItemFailure> {
        let root = self.work_root.clone();
        let prefix = format!("{}-", item.identity.short());
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
        })
        .await
        .map_err(|e| ItemFailure::Retrieval {
            cause: e.to_string(),
        })?
        .map_err(|e| ItemFailure::Retrieval {
            cause: format!("cannot create work directory: {}", e),
        })
    }

    async fn run_stage(&self, stage: &dyn Stage, ctx: &mut MeetingContext) -> Result<(), StageError> {
        let kind = stage.kind();
        let deadline = self.limits.stage_timeout();
        let started = Instant::now();
        debug!(stage = %kind, position = kind.position(), "Stage started");

        match tokio::time::timeout(deadline, stage.run(ctx)).await {
            Ok(Ok(())) => {
                debug!(
                    stage = %kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage completed"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(stage = %kind, error = %e.cause, "Stage failed");
                Err(e)
            }
            Err(_) => {
                warn!(stage = %kind, timeout_secs = deadline.as_secs(), "Stage timed out");
                Err(StageError::new(
                    kind,
                    format!("timed out after {}s", deadline.as_secs()),
                ))
            }
        }
    }

    /// Output artifacts derived from the context
    fn output_artifacts(ctx: &MeetingContext) -> Result<Vec<Artifact>, ItemFailure> {
        let stem = ctx.item.output_stem();
        let mut outputs = Vec::new();

        if let Some(transcript) = &ctx.transcript {
            outputs.push(Artifact::new(
                format!("{}_transcript.txt", stem),
                ArtifactKind::Transcript,
                transcript.text.clone(),
            ));
        }

        let summary = json!({
            "identity": ctx.item.identity,
            "source": ctx.item.name,
            "title": ctx.meeting.title,
            "processed_at": Utc::now(),
            "language": ctx.transcript.as_ref().map(|t| t.language.clone()),
            "duration_seconds": ctx.transcript.as_ref().map(|t| t.duration_seconds),
            "analysis": ctx.analysis,
            "entities": ctx.entity_refs(),
            "tasks": ctx.tasks.iter().map(|t| &t.id).collect::<Vec<_>>(),
        });
        let json = serde_json::to_string_pretty(&summary).map_err(|e| ItemFailure::Publish {
            cause: e.to_string(),
        })?;
        outputs.push(Artifact::new(
            format!("{}_analysis.json", stem),
            ArtifactKind::Analysis,
            json,
        ));

        // Notes are also dropped next to the transcript
        for note in &ctx.notes {
            let mut copy = note.clone();
            copy.relative_path = note.file_name().to_string();
            outputs.push(copy);
        }
        Ok(outputs)
    }

    async fn commit(&self, ctx: &MeetingContext) -> Result<ProcessOutcome, ItemFailure> {
        let publish_failed = |e: &dyn std::fmt::Display| ItemFailure::Publish {
            cause: e.to_string(),
        };
        let mut published = 0;

        for artifact in Self::output_artifacts(ctx)? {
            self.backend
                .publish(&artifact, Destination::Output)
                .await
                .map_err(|e| publish_failed(&e))?;
            published += 1;
        }

        for note in &ctx.notes {
            self.backend
                .publish(note, Destination::Vault)
                .await
                .map_err(|e| publish_failed(&e))?;
            published += 1;
        }

        if let Some(detection) = &ctx.entities {
            for record in &detection.records {
                // Records are created once; later meetings only link to them
                let exists = self
                    .backend
                    .exists(&record.relative_path, Destination::Vault)
                    .await
                    .map_err(|e| publish_failed(&e))?;
                if !exists {
                    self.backend
                        .publish(record, Destination::Vault)
                        .await
                        .map_err(|e| publish_failed(&e))?;
                    published += 1;
                }
            }
        }

        let tasks_created = self
            .tasks
            .record_extracted(&ctx.tasks)
            .await
            .map_err(|e| publish_failed(&e))?;

        let archived_to = self
            .backend
            .archive(&ctx.item.location)
            .await
            .map_err(|e| publish_failed(&e))?;
        debug!(archived_to = %archived_to, "Source archived");

        Ok(ProcessOutcome {
            title: ctx.meeting.title.clone(),
            tasks_created,
            artifacts_published: published,
            archived_to,
        })
    }

    /// Regenerate the task dashboard. Failures are logged, never escalated.
    pub async fn refresh_dashboard(&self) {
        let kind = StageKind::DashboardRefresh;
        let refresh = async {
            let tasks = self.tasks.list(None).await.map_err(|e| e.to_string())?;
            let artifacts = self.dashboard.refresh(&tasks).map_err(|e| format!("{:#}", e))?;
            for artifact in &artifacts {
                self.backend
                    .publish(artifact, Destination::Vault)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Ok::<usize, String>(tasks.len())
        };

        match tokio::time::timeout(self.limits.stage_timeout(), refresh).await {
            Ok(Ok(task_count)) => debug!(stage = %kind, task_count, "Dashboard refreshed"),
            Ok(Err(cause)) => warn!(stage = %kind, error = %cause, "Dashboard refresh failed"),
            Err(_) => warn!(stage = %kind, "Dashboard refresh timed out"),
        }
    }

    /// Write `ERROR_<name>_<timestamp>.md` to the output location. Best effort.
    pub async fn report_failure(&self, item: &WorkItem, failure: &ItemFailure) {
        let now = Utc::now();
        let name = format!("ERROR_{}_{}.md", item.output_stem(), now.format("%Y%m%d_%H%M%S"));
        let content = format!(
            "# Processing failed: {}\n\n\
             - Identity: `{}`\n\
             - Source: {}\n\
             - Attempt: {}\n\
             - Stage: {}\n\
             - When: {}\n\n\
             ## Error\n\n```\n{}\n```\n",
            item.name,
            item.identity,
            item.location,
            item.attempt_count,
            failure.stage_label().unwrap_or("worker"),
            now.to_rfc3339(),
            failure,
        );

        let report = Artifact::new(name, ArtifactKind::ErrorReport, content);
        if let Err(e) = self.backend.publish(&report, Destination::Output).await {
            warn!(identity = %item.identity, error = %e, "Could not write error report");
        }
    }
}
