//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary and reads its JSON output.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{run_tool, Transcriber, ToolError};
use crate::domain::{AudioArtifact, Transcript};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Parse whisper's JSON output into a transcript
fn parse_output(json: &str) -> Result<Transcript, serde_json::Error> {
    let whisper: WhisperOutput = serde_json::from_str(json)?;
    let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);

    Ok(Transcript {
        text: whisper.text.trim().to_string(),
        language: if whisper.language.is_empty() {
            "en".to_string()
        } else {
            whisper.language
        },
        duration_seconds: duration,
    })
}

pub struct WhisperTranscriber {
    binary_path: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: None,
        }
    }

    /// Force a language instead of letting whisper detect it
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &AudioArtifact, timeout: Duration) -> Result<Transcript> {
        // Output lands next to the audio, inside the worker's private directory
        let output_dir = audio
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(std::env::temp_dir);

        let mut args: Vec<std::ffi::OsString> = vec![
            audio.path.as_os_str().to_owned(),
            "--model".into(),
            self.model.clone().into(),
            "--output_dir".into(),
            output_dir.as_os_str().to_owned(),
            "--output_format".into(),
            "json".into(),
        ];
        if let Some(language) = &self.language {
            args.push("--language".into());
            args.push(language.into());
        }

        run_tool(&self.binary_path, args, None, timeout).await?;

        let stem = audio.path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = output_dir.join(format!("{}.json", stem));
        let json = tokio::fs::read_to_string(&json_path)
            .await
            .with_context(|| format!("Failed to read whisper output {}", json_path.display()))?;

        let transcript = parse_output(&json).map_err(|e| ToolError::Output {
            tool: self.binary_path.clone(),
            message: e.to_string(),
        })?;
        if transcript.text.is_empty() {
            return Err(ToolError::Output {
                tool: self.binary_path.clone(),
                message: "empty transcript".to_string(),
            }
            .into());
        }

        tracing::debug!(
            words = transcript.word_count(),
            language = %transcript.language,
            duration_seconds = transcript.duration_seconds,
            "Transcribed"
        );
        Ok(transcript)
    }
}
