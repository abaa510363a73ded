//! Safety limits and input validation for meeting sources.
//!
//! Guards the pipeline through configurable limits on:
//! - Which file names are accepted (input glob patterns)
//! - Source size (empty files and oversized recordings are rejected)
//! - Per-stage execution time
//! - Denylist patterns (to avoid touching secrets that land in the input)

use std::time::Duration;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for item processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum source size in bytes (default: 10GB)
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,

    /// Per-stage timeout in seconds (default: 1800 = 30 min)
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    /// Glob patterns a source file name must match
    #[serde(default = "default_input_patterns")]
    pub input_patterns: Vec<String>,

    /// Glob patterns to reject (files matching these won't be processed)
    #[serde(default = "default_denylist")]
    pub denylist_patterns: Vec<String>,
}

fn default_max_source_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
} // 10GB
fn default_stage_timeout() -> u64 {
    1800
} // 30 min

fn default_input_patterns() -> Vec<String> {
    vec!["*.mp4".to_string()]
}

fn default_denylist() -> Vec<String> {
    vec![
        "**/.env*".to_string(),
        "**/secrets*".to_string(),
        "**/*credential*".to_string(),
        "**/token.json".to_string(),
        "**/.*".to_string(),
    ]
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            stage_timeout_seconds: default_stage_timeout(),
            input_patterns: default_input_patterns(),
            denylist_patterns: default_denylist(),
        }
    }
}

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl SafetyLimits {
    /// Deadline applied to every stage call
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Check if a path matches any denylist pattern
    pub fn is_denylisted(&self, path: &str) -> bool {
        for pattern_str in &self.denylist_patterns {
            if let Ok(pattern) = Pattern::new(pattern_str) {
                if pattern.matches(path) {
                    return true;
                }
            }
        }
        false
    }

    /// Check a bare file name against the input patterns (case-insensitive)
    pub fn matches_input(&self, file_name: &str) -> bool {
        self.input_patterns.iter().any(|p| {
            Pattern::new(p)
                .map(|pattern| pattern.matches_with(file_name, NAME_MATCH))
                .unwrap_or(false)
        })
    }

    /// Whether a listed file should be considered at all
    pub fn accepts(&self, file_name: &str) -> bool {
        self.matches_input(file_name) && !self.is_denylisted(file_name)
    }

    /// Validate a source before spending work on it
    pub fn validate_source(&self, file_name: &str, size_bytes: u64) -> Result<(), SafetyViolation> {
        if self.is_denylisted(file_name) {
            return Err(SafetyViolation::DenylistMatch {
                path: file_name.to_string(),
            });
        }

        if !self.matches_input(file_name) {
            return Err(SafetyViolation::PatternMismatch {
                name: file_name.to_string(),
            });
        }

        if size_bytes == 0 {
            return Err(SafetyViolation::EmptySource);
        }

        if size_bytes > self.max_source_bytes {
            return Err(SafetyViolation::MaxSourceBytes {
                actual: size_bytes,
                limit: self.max_source_bytes,
            });
        }

        Ok(())
    }
}

/// Safety violation errors
#[derive(Debug, Clone, Error)]
pub enum SafetyViolation {
    #[error("Source is empty")]
    EmptySource,

    #[error("Maximum source bytes exceeded: {actual} > {limit}")]
    MaxSourceBytes { actual: u64, limit: u64 },

    #[error("File name does not match any input pattern: {name}")]
    PatternMismatch { name: String },

    #[error("Path matches denylist pattern: {path}")]
    DenylistMatch { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SafetyLimits::default();
        assert_eq!(limits.stage_timeout(), Duration::from_secs(1800));
        assert_eq!(limits.input_patterns, vec!["*.mp4"]);
    }

    #[test]
    fn test_denylist_matching() {
        let limits = SafetyLimits::default();

        assert!(limits.is_denylisted(".env"));
        assert!(limits.is_denylisted("drive/credentials.json"));
        assert!(limits.is_denylisted("in/token.json"));
        assert!(limits.is_denylisted(".meeting1.mp4"));

        assert!(!limits.is_denylisted("meeting1.mp4"));
        assert!(!limits.is_denylisted("Q3 review.mp4"));
    }

    #[test]
    fn test_input_pattern_is_case_insensitive() {
        let limits = SafetyLimits::default();
        assert!(limits.matches_input("meeting1.mp4"));
        assert!(limits.matches_input("MEETING1.MP4"));
        assert!(!limits.matches_input("meeting1.mp4.part"));
        assert!(!limits.matches_input("notes.txt"));
    }

    #[test]
    fn test_source_validation() {
        let limits = SafetyLimits {
            max_source_bytes: 100,
            ..Default::default()
        };

        assert!(limits.validate_source("a.mp4", 50).is_ok());
        assert!(matches!(
            limits.validate_source("a.mp4", 0),
            Err(SafetyViolation::EmptySource)
        ));
        assert!(matches!(
            limits.validate_source("a.mp4", 200),
            Err(SafetyViolation::MaxSourceBytes { .. })
        ));
        assert!(matches!(
            limits.validate_source("a.mov", 50),
            Err(SafetyViolation::PatternMismatch { .. })
        ));
        assert!(matches!(
            limits.validate_source(".env.mp4", 50),
            Err(SafetyViolation::DenylistMatch { .. })
        ));
    }
}
