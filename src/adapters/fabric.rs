//! Fabric adapter for AI analysis and entity extraction.
//!
//! Spawns `fabric -p <pattern>` and pipes the transcript to stdin. Patterns
//! are asked for JSON; anything else is kept as a free-text summary.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{run_tool, Analyzer, EntityDetector};
use crate::domain::{EntityDetection, EntityKind, EntityRef, MeetingAnalysis, Transcript};

/// Fabric CLI in subprocess mode
#[derive(Debug, Clone)]
pub struct FabricClient {
    /// Path to the fabric binary (default: "fabric")
    binary_path: String,
}

impl Default for FabricClient {
    fn default() -> Self {
        Self::new("fabric")
    }
}

impl FabricClient {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Run one pattern over `input` and return its stdout
    pub async fn run_pattern(&self, pattern: &str, input: &str, timeout: Duration) -> Result<String> {
        let stdout = run_tool(&self.binary_path, ["-p", pattern], Some(input), timeout)
            .await
            .with_context(|| format!("Fabric pattern '{}' failed", pattern))?;
        String::from_utf8(stdout).context("Fabric output is not valid UTF-8")
    }
}

/// Locate a JSON object in model output (fenced block or bare braces)
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Summary used when the analyzer returns nothing usable
fn basic_analysis(transcript: &Transcript) -> MeetingAnalysis {
    let words = transcript.word_count();
    MeetingAnalysis {
        summary: format!(
            "Words: {}\nCharacters: {}\nEstimated length: {} min",
            words,
            transcript.text.chars().count(),
            words / 130
        ),
        ..MeetingAnalysis::default()
    }
}

/// Interpret analyzer output: structured JSON when present, else free text
fn parse_analysis(output: &str, transcript: &Transcript) -> MeetingAnalysis {
    if let Some(json) = extract_json(output) {
        match serde_json::from_str::<MeetingAnalysis>(json) {
            Ok(analysis) => return analysis,
            Err(e) => tracing::debug!(error = %e, "Analysis output is not structured JSON"),
        }
    }

    let text = output.trim();
    if text.is_empty() {
        return basic_analysis(transcript);
    }
    MeetingAnalysis {
        summary: text.to_string(),
        ..MeetingAnalysis::default()
    }
}

/// Meeting analysis through a Fabric pattern
pub struct FabricAnalyzer {
    client: FabricClient,
    pattern: String,
}

impl FabricAnalyzer {
    pub fn new(client: FabricClient, pattern: impl Into<String>) -> Self {
        Self {
            client,
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl Analyzer for FabricAnalyzer {
    async fn analyze(&self, transcript: &Transcript, timeout: Duration) -> Result<MeetingAnalysis> {
        let output = self
            .client
            .run_pattern(&self.pattern, &transcript.text, timeout)
            .await?;
        let analysis = parse_analysis(&output, transcript);
        tracing::debug!(
            action_items = analysis.action_items.len(),
            decisions = analysis.decisions.len(),
            "Analysis parsed"
        );
        Ok(analysis)
    }
}

#[derive(Debug, Default, Deserialize)]
struct EntityOutput {
    #[serde(default, alias = "persons")]
    people: Vec<String>,
    #[serde(default, alias = "organizations")]
    companies: Vec<String>,
    #[serde(default, alias = "tools")]
    technologies: Vec<String>,
}

impl EntityOutput {
    fn into_refs(self) -> Vec<EntityRef> {
        let groups = [
            (EntityKind::Person, self.people),
            (EntityKind::Company, self.companies),
            (EntityKind::Technology, self.technologies),
        ];

        let mut refs = BTreeSet::new();
        for (kind, names) in groups {
            for name in names {
                let name = name.trim();
                if !name.is_empty() {
                    refs.insert(EntityRef::new(kind, name));
                }
            }
        }
        refs.into_iter().collect()
    }
}

/// Entity extraction through a Fabric pattern
pub struct FabricEntityDetector {
    client: FabricClient,
    pattern: String,
}

impl FabricEntityDetector {
    pub fn new(client: FabricClient, pattern: impl Into<String>) -> Self {
        Self {
            client,
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl EntityDetector for FabricEntityDetector {
    async fn detect(
        &self,
        transcript: &Transcript,
        analysis: &MeetingAnalysis,
        timeout: Duration,
    ) -> Result<EntityDetection> {
        let mut input = String::new();
        if !analysis.summary.is_empty() {
            input.push_str("Summary:\n");
            input.push_str(&analysis.summary);
            input.push_str("\n\nTranscript:\n");
        }
        input.push_str(&transcript.text);

        let output = self.client.run_pattern(&self.pattern, &input, timeout).await?;
        let parsed = match extract_json(&output).map(serde_json::from_str::<EntityOutput>) {
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Entity output is malformed, no entities recorded");
                EntityOutput::default()
            }
            None => EntityOutput::default(),
        };

        let entities = parsed.into_refs();
        let records = entities.iter().map(crate::notes::entity_record).collect();
        Ok(EntityDetection { entities, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            language: "en".to_string(),
            duration_seconds: 0.0,
        }
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let output = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nThanks";
        assert_eq!(extract_json(output), Some("{\"summary\": \"ok\"}"));
    }

    #[test]
    fn test_extract_json_from_bare_braces() {
        assert_eq!(extract_json("noise {\"a\": 1} noise"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_structured_analysis() {
        let output = r#"{"title": "Roadmap sync", "summary": "Planned Q3",
            "action_items": [{"title": "Draft roadmap", "category": "business"}]}"#;
        let analysis = parse_analysis(output, &transcript("x"));

        assert_eq!(analysis.title.as_deref(), Some("Roadmap sync"));
        assert_eq!(analysis.action_items.len(), 1);
    }

    #[test]
    fn test_free_text_analysis_becomes_summary() {
        let analysis = parse_analysis("# Summary\nWe met.", &transcript("x"));
        assert_eq!(analysis.summary, "# Summary\nWe met.");
        assert!(analysis.action_items.is_empty());
    }

    #[test]
    fn test_empty_output_falls_back_to_basic_analysis() {
        let analysis = parse_analysis("  ", &transcript("one two three"));
        assert!(analysis.summary.contains("Words: 3"));
    }

    #[test]
    fn test_entity_output_dedupes_and_trims() {
        let parsed: EntityOutput = serde_json::from_str(
            r#"{"people": ["Ada Lovelace", " Ada Lovelace ", ""], "organizations": ["Acme"]}"#,
        )
        .unwrap();
        let refs = parsed.into_refs();

        assert_eq!(
            refs,
            vec![
                EntityRef::new(EntityKind::Person, "Ada Lovelace"),
                EntityRef::new(EntityKind::Company, "Acme"),
            ]
        );
    }

    #[test]
    fn test_client_default_binary() {
        assert_eq!(FabricClient::default().binary_path, "fabric");
    }
}
