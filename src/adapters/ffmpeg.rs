//! Audio extraction via the ffmpeg binary.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{run_tool, AudioExtractor, ToolError};
use crate::domain::AudioArtifact;

/// Extracts a mono 16 kHz FLAC track from the recording
pub struct FfmpegExtractor {
    binary_path: String,
}

impl FfmpegExtractor {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn args(source: &Path, target: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["-y".into(), "-i".into()];
        args.push(source.as_os_str().to_owned());
        for flag in ["-vn", "-ac", "1", "-ar", "16000", "-c:a", "flac", "-loglevel", "error"] {
            args.push(flag.into());
        }
        args.push(target.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(
        &self,
        source: &Path,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<AudioArtifact> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let target = workdir.join(format!("{}.flac", stem));

        run_tool(&self.binary_path, Self::args(source, &target), None, timeout).await?;

        let size = tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("ffmpeg produced no output at {}", target.display()))?
            .len();
        if size == 0 {
            return Err(ToolError::Output {
                tool: self.binary_path.clone(),
                message: "extracted audio is empty".to_string(),
            }
            .into());
        }

        tracing::debug!(audio = %target.display(), size, "Audio extracted");
        Ok(AudioArtifact {
            path: target,
            format: "flac".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ffmpeg_arguments() {
        let args = FfmpegExtractor::args(
            &PathBuf::from("/in/meeting1.mp4"),
            &PathBuf::from("/work/meeting1.flac"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();

        assert_eq!(args[0], "-y");
        assert_eq!(args[2], "/in/meeting1.mp4");
        assert!(args.windows(2).any(|w| w == ["-ar", "16000"]));
        assert_eq!(args.last().unwrap(), "/work/meeting1.flac");
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let extractor = FfmpegExtractor::new("/nonexistent/ffmpeg");
        let result = extractor
            .extract(&temp.path().join("a.mp4"), temp.path(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
