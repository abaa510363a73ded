//! Stage collaborators.
//!
//! Each pipeline stage delegates its real work to one of the traits below.
//! The default implementations shell out to external tools (ffmpeg,
//! whisper, fabric); tests substitute in-process fakes.

pub mod fabric;
pub mod ffmpeg;
pub mod whisper;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::{
    Artifact, AudioArtifact, EntityDetection, EntityRef, MeetingAnalysis, MeetingRef, Task,
    Transcript,
};

pub use fabric::{FabricAnalyzer, FabricClient, FabricEntityDetector};
pub use ffmpeg::FfmpegExtractor;
pub use whisper::WhisperTranscriber;

/// Converts the source recording into audio suitable for transcription
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, source: &Path, workdir: &Path, timeout: Duration)
        -> Result<AudioArtifact>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioArtifact, timeout: Duration) -> Result<Transcript>;
}

/// Summary, decisions and action items from a transcript
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, transcript: &Transcript, timeout: Duration) -> Result<MeetingAnalysis>;
}

/// People, companies and technologies mentioned in a meeting
#[async_trait]
pub trait EntityDetector: Send + Sync {
    async fn detect(
        &self,
        transcript: &Transcript,
        analysis: &MeetingAnalysis,
        timeout: Duration,
    ) -> Result<EntityDetection>;
}

/// Renders the vault documents for one meeting
pub trait NoteGenerator: Send + Sync {
    fn render(
        &self,
        meeting: &MeetingRef,
        analysis: &MeetingAnalysis,
        tasks: &[Task],
        entities: &[EntityRef],
    ) -> Result<Vec<Artifact>>;
}

/// Renders analytics over the full task set
pub trait DashboardRefresher: Send + Sync {
    fn refresh(&self, tasks: &[Task]) -> Result<Vec<Artifact>>;
}

/// Errors from external tool invocations
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {after:?}")]
    TimedOut { tool: String, after: Duration },

    #[error("{tool} failed with exit code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} produced unusable output: {message}")]
    Output { tool: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a tool to completion, optionally feeding `stdin`, and return stdout.
///
/// The child is killed if the deadline passes or the caller is cancelled.
pub(crate) async fn run_tool<I, S>(
    program: &str,
    args: I,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<Vec<u8>, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            tool: program.to_string(),
            source,
        })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        // Dropping the pipe signals EOF
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ToolError::TimedOut {
            tool: program.to_string(),
            after: timeout,
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            tool: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().chars().take(500).collect(),
        });
    }

    Ok(output.stdout)
}
