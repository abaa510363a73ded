//! Shared fixtures for integration tests: settings over a temp directory
//! and in-process stand-ins for the external tools.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use meetvault::adapters::{Analyzer, AudioExtractor, EntityDetector, Transcriber};
use meetvault::config::Settings;
use meetvault::core::Collaborators;
use meetvault::domain::{
    ActionItem, AudioArtifact, EntityDetection, EntityKind, EntityRef, MeetingAnalysis,
    TaskCategory, TaskPriority, Transcript,
};
use meetvault::notes::{entity_record, MarkdownNoteGenerator, TaskDashboard};
use meetvault::storage::LocalBackend;

/// Directory layout of one test run
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn input(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn processed(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn vault(&self) -> PathBuf {
        self.root.join("vault")
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    /// Local-mode settings; `overrides` win over the defaults used here
    pub fn settings(&self, overrides: &[(&str, &str)]) -> Settings {
        let mut env: HashMap<String, String> = [
            ("STORAGE_MODE", "local".to_string()),
            ("INPUT_DIR", self.input().display().to_string()),
            ("OUTPUT_DIR", self.output().display().to_string()),
            ("PROCESSED_DIR", self.processed().display().to_string()),
            ("VAULT_PATH", self.vault().display().to_string()),
            ("MEETVAULT_HOME", self.home().display().to_string()),
            ("WORKER_COUNT", "2".to_string()),
            ("POLL_INTERVAL_SECS", "1".to_string()),
            ("SHUTDOWN_GRACE_SECS", "5".to_string()),
            ("STAGE_TIMEOUT_SECS", "10".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        for (key, value) in overrides {
            env.insert(key.to_string(), value.to_string());
        }

        Settings::resolve(None, &|key| env.get(key).cloned()).unwrap()
    }

    pub fn backend(&self, settings: &Settings) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(
            self.input(),
            self.output(),
            self.processed(),
            self.vault(),
            settings.safety.clone(),
        ))
    }

    /// Write a source file of `len` bytes. Sparse, so large sizes are cheap.
    pub fn write_source(&self, name: &str, len: u64, seed: &str) -> PathBuf {
        std::fs::create_dir_all(self.input()).unwrap();
        let path = self.input().join(name);
        let file = std::fs::File::create(&path).unwrap();
        std::io::Write::write_all(&mut &file, seed.as_bytes()).unwrap();
        file.set_len(len.max(seed.len() as u64)).unwrap();
        path
    }
}

/// Hands the source through as "audio"
pub struct PassthroughExtractor;

#[async_trait]
impl AudioExtractor for PassthroughExtractor {
    async fn extract(
        &self,
        source: &Path,
        _workdir: &Path,
        _timeout: Duration,
    ) -> Result<AudioArtifact> {
        Ok(AudioArtifact {
            path: source.to_path_buf(),
            format: "mp4".to_string(),
        })
    }
}

/// Transcribes from the file name. Names containing `broken` fail,
/// names containing `slow` take longer than any test stage timeout.
pub struct NameTranscriber;

#[async_trait]
impl Transcriber for NameTranscriber {
    async fn transcribe(&self, audio: &AudioArtifact, _timeout: Duration) -> Result<Transcript> {
        let stem = audio
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if stem.contains("broken") {
            bail!("whisper exited with status 1: corrupt audio stream");
        }
        if stem.contains("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Transcript {
            text: format!("Ada Lovelace walked through the {} plan for Postgres.", stem),
            language: "en".to_string(),
            duration_seconds: 1800.0,
        })
    }
}

/// One action item per meeting. Panics on transcripts mentioning `panic`.
pub struct ScriptedAnalyzer;

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, transcript: &Transcript, _timeout: Duration) -> Result<MeetingAnalysis> {
        if transcript.text.contains("panic") {
            panic!("analyzer crashed");
        }
        Ok(MeetingAnalysis {
            title: None,
            summary: transcript.text.clone(),
            decisions: vec!["Ship the migration".to_string()],
            action_items: vec![ActionItem {
                title: "Migrate billing to Postgres".to_string(),
                description: "Move the billing tables.".to_string(),
                category: TaskCategory::Technical,
                priority: TaskPriority::High,
                mentions: vec!["Ada Lovelace".to_string()],
            }],
            topics: vec!["database".to_string()],
        })
    }
}

pub struct FixedEntities;

#[async_trait]
impl EntityDetector for FixedEntities {
    async fn detect(
        &self,
        _transcript: &Transcript,
        _analysis: &MeetingAnalysis,
        _timeout: Duration,
    ) -> Result<EntityDetection> {
        let entities = vec![
            EntityRef::new(EntityKind::Person, "Ada Lovelace"),
            EntityRef::new(EntityKind::Technology, "Postgres"),
        ];
        let records = entities.iter().map(entity_record).collect();
        Ok(EntityDetection { entities, records })
    }
}

/// Fakes for the subprocess tools, real renderers for the vault documents
pub fn collaborators() -> Collaborators {
    Collaborators {
        audio: Arc::new(PassthroughExtractor),
        transcriber: Arc::new(NameTranscriber),
        analyzer: Arc::new(ScriptedAnalyzer),
        entities: Arc::new(FixedEntities),
        notes: Arc::new(MarkdownNoteGenerator),
        dashboard: Arc::new(TaskDashboard),
    }
}

/// File names directly inside `dir`
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
