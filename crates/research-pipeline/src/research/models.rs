//! Agent input and output models
//!
//! These types cross the Research → Analysis → Report boundaries and are also the
//! shapes requested from the LLM in structured calls, so every collection field
//! tolerates `null` and absent values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::state::{CompletionStatus, Fact};

pub const DEFAULT_AUTHOR: &str = "Deep Research Agent";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedFact {
    #[serde(default, deserialize_with = "null_as_default")]
    pub statement: String,
    /// 0.0 to 1.0
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
}

impl ExtractedFact {
    pub fn new(
        statement: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
        category: impl Into<String>,
    ) -> Self {
        Self {
            statement: statement.into(),
            confidence,
            source: source.into(),
            category: category.into(),
        }
    }

    pub fn into_fact(self) -> Fact {
        Fact::new(self.statement, self.source, self.confidence).with_tag(self.category)
    }
}

impl From<&Fact> for ExtractedFact {
    fn from(fact: &Fact) -> Self {
        Self {
            statement: fact.statement.clone(),
            confidence: fact.confidence,
            source: fact.source_url.clone(),
            category: fact.tags.iter().next().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FactExtractionResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub facts: Vec<ExtractedFact>,
}

impl FactExtractionResult {
    pub fn new(facts: Vec<ExtractedFact>) -> Self {
        Self { facts }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchInput {
    pub topic: String,
    #[serde(default)]
    pub research_brief: String,
    #[serde(default = "ResearchInput::default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "ResearchInput::default_min_quality")]
    pub min_quality_threshold: f64,
}

impl ResearchInput {
    fn default_max_iterations() -> usize {
        3
    }

    fn default_min_quality() -> f64 {
        7.0
    }

    pub fn new(topic: impl Into<String>, research_brief: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            research_brief: research_brief.into(),
            max_iterations: Self::default_max_iterations(),
            min_quality_threshold: Self::default_min_quality(),
        }
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_min_quality(mut self, threshold: f64) -> Self {
        self.min_quality_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub findings: Vec<FactExtractionResult>,
    /// 0..10
    #[serde(default)]
    pub average_quality: f64,
    #[serde(default)]
    pub iterations_used: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub research_topics_covered: Vec<String>,
    #[serde(default)]
    pub completion_status: CompletionStatus,
}

impl ResearchOutput {
    pub fn fact_count(&self) -> usize {
        self.findings.iter().map(|f| f.facts.len()).sum()
    }

    pub fn all_facts(&self) -> impl Iterator<Item = &ExtractedFact> {
        self.findings.iter().flat_map(|f| f.facts.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub findings: Vec<FactExtractionResult>,
    pub research_brief: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KeyInsight {
    #[serde(default, deserialize_with = "null_as_default")]
    pub statement: String,
    /// 0.0 to 1.0
    #[serde(default)]
    pub importance: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_facts: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub supporting_evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Contradiction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fact_1: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fact_2: String,
    /// 0.0 to 1.0
    #[serde(default)]
    pub severity: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub synthesis_narrative: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_insights: Vec<KeyInsight>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contradictions: Vec<Contradiction>,
    /// 0.0 to 1.0
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub themes_identified: Vec<String>,
    #[serde(default)]
    pub completion_status: CompletionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    pub research: ResearchOutput,
    pub analysis: AnalysisOutput,
    pub topic: String,
    #[serde(default = "ReportInput::default_author")]
    pub author: String,
}

impl ReportInput {
    fn default_author() -> String {
        DEFAULT_AUTHOR.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReportSection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub heading: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub citation_indices: Vec<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gaps: Vec<String>,
}

impl ReportSection {
    pub fn new(heading: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.push(gap.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

/// Refined draft produced by the supervision loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReport {
    pub brief: String,
    pub text: String,
    pub sections: Vec<ReportSection>,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Final report; `created_at` is optional so repair can fill it in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReportOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub executive_summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sections: Vec<ReportSection>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub citations: Vec<Citation>,
    /// 0..10
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_status: CompletionStatus,
}

pub type FinalReport = ReportOutput;

impl ReportOutput {
    /// Markdown rendering for terminals and files
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        out.push_str(&format!(
            "_Quality: {:.1}/10 · Status: {}_\n\n",
            self.quality_score, self.completion_status
        ));
        out.push_str("## Executive Summary\n\n");
        out.push_str(&self.executive_summary);
        out.push_str("\n\n");

        for section in &self.sections {
            out.push_str(&format!("## {}\n\n{}\n", section.heading, section.content));
            if !section.citation_indices.is_empty() {
                let refs: Vec<String> = section
                    .citation_indices
                    .iter()
                    .map(|i| format!("[{}]", i))
                    .collect();
                out.push_str(&format!("\nSources: {}\n", refs.join(" ")));
            }
            if !section.gaps.is_empty() {
                out.push_str("\nOpen gaps:\n");
                for gap in &section.gaps {
                    out.push_str(&format!("- {}\n", gap));
                }
            }
            out.push('\n');
        }

        if !self.citations.is_empty() {
            out.push_str("### Sources\n\n");
            for citation in &self.citations {
                match &citation.url {
                    Some(url) if url != &citation.source => {
                        out.push_str(&format!("[{}] {}: {}\n", citation.index, citation.source, url))
                    }
                    _ => out.push_str(&format!("[{}] {}\n", citation.index, citation.source)),
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_collections_deserialize_as_empty() {
        let output: ResearchOutput =
            serde_json::from_str(r#"{"findings": null, "average_quality": 4.0}"#).unwrap();
        assert!(output.findings.is_empty());
        assert_eq!(output.completion_status, CompletionStatus::Pending);

        let report: ReportOutput =
            serde_json::from_str(r#"{"title": null, "sections": null}"#).unwrap();
        assert!(report.title.is_empty());
        assert!(report.created_at.is_none());
    }

    #[test]
    fn test_research_input_defaults() {
        let input: ResearchInput = serde_json::from_str(r#"{"topic": "AI"}"#).unwrap();
        assert_eq!(input.max_iterations, 3);
        assert_eq!(input.min_quality_threshold, 7.0);
    }

    #[test]
    fn test_report_input_default_author() {
        let input: ReportInput = serde_json::from_value(serde_json::json!({
            "research": {},
            "analysis": {},
            "topic": "AI"
        }))
        .unwrap();
        assert_eq!(input.author, DEFAULT_AUTHOR);
    }

    #[test]
    fn test_fact_count() {
        let output = ResearchOutput {
            findings: vec![
                FactExtractionResult::new(vec![ExtractedFact::new("a", "s", 0.5, "c")]),
                FactExtractionResult::new(vec![
                    ExtractedFact::new("b", "s", 0.5, "c"),
                    ExtractedFact::new("c", "s", 0.5, "c"),
                ]),
            ],
            ..Default::default()
        };
        assert_eq!(output.fact_count(), 3);
    }

    #[test]
    fn test_markdown_lists_sources() {
        let report = ReportOutput {
            title: "Research Report: Rust".to_string(),
            executive_summary: "Summary".to_string(),
            sections: vec![ReportSection::new("Overview", "Body").with_gap("benchmarks")],
            citations: vec![Citation {
                index: 1,
                source: "https://www.rust-lang.org".to_string(),
                url: Some("https://www.rust-lang.org".to_string()),
                accessed_at: Utc::now(),
            }],
            quality_score: 7.0,
            created_at: Some(Utc::now()),
            completion_status: CompletionStatus::Completed,
        };

        let md = report.to_markdown();
        assert!(md.starts_with("# Research Report: Rust"));
        assert!(md.contains("- benchmarks"));
        assert!(md.contains("[1] https://www.rust-lang.org"));
    }
}
