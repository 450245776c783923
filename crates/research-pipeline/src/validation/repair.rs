//! Total, idempotent repair of agent outputs
//!
//! `repair(repair(x)) == repair(x)` for every input, and a value with nothing to
//! fix comes back unchanged.

use chrono::Utc;

use super::fallback::ERROR_RECOVERY;
use crate::research::state::{clamp_quality, clamp_unit};
use crate::research::{
    AnalysisOutput, CompletionStatus, ExtractedFact, FactExtractionResult, KeyInsight,
    ReportOutput, ReportSection, ResearchOutput,
};

fn settle_status(status: CompletionStatus, repaired: bool) -> CompletionStatus {
    match (status, repaired) {
        (CompletionStatus::Pending, true) => CompletionStatus::CompletedWithRepairs,
        (CompletionStatus::Pending, false) => CompletionStatus::Completed,
        (other, _) => other,
    }
}

fn clamp_tracked(value: f64, clamp: fn(f64) -> f64, repaired: &mut bool) -> f64 {
    let clamped = clamp(value);
    if clamped != value {
        *repaired = true;
    }
    clamped
}

pub fn repair_research(output: Option<&ResearchOutput>, topic: &str) -> ResearchOutput {
    let mut repaired = output.is_none();
    let mut result = output.cloned().unwrap_or_default();

    let before = result.findings.len();
    result.findings = result
        .findings
        .into_iter()
        .map(|finding| {
            let count = finding.facts.len();
            let facts: Vec<ExtractedFact> = finding
                .facts
                .into_iter()
                .filter(|fact| !fact.statement.trim().is_empty())
                .map(|mut fact| {
                    fact.confidence = clamp_tracked(fact.confidence, clamp_unit, &mut repaired);
                    fact
                })
                .collect();
            if facts.len() != count {
                repaired = true;
            }
            FactExtractionResult { facts }
        })
        .filter(|finding| !finding.facts.is_empty())
        .collect();
    if result.findings.len() != before {
        repaired = true;
    }

    if result.findings.is_empty() {
        repaired = true;
        result.findings = vec![FactExtractionResult::new(vec![ExtractedFact::new(
            format!("No research findings available for '{}'", topic),
            ERROR_RECOVERY,
            0.3,
            "fallback",
        )])];
    }

    result.average_quality = clamp_tracked(result.average_quality, clamp_quality, &mut repaired);

    if result.research_topics_covered.is_empty() {
        repaired = true;
        result.research_topics_covered = vec![topic.to_string()];
    }

    result.completion_status = settle_status(result.completion_status, repaired);
    result
}

pub fn repair_analysis(output: Option<&AnalysisOutput>, topic: &str) -> AnalysisOutput {
    let mut repaired = output.is_none();
    let mut result = output.cloned().unwrap_or_default();

    if result.synthesis_narrative.trim().is_empty() {
        repaired = true;
        result.synthesis_narrative = format!(
            "Analysis for '{}' is incomplete. Insufficient data for comprehensive synthesis.",
            topic
        );
    }

    let before = result.key_insights.len();
    result
        .key_insights
        .retain(|insight| !insight.statement.trim().is_empty());
    if result.key_insights.len() != before {
        repaired = true;
    }
    for insight in &mut result.key_insights {
        insight.importance = clamp_tracked(insight.importance, clamp_unit, &mut repaired);
    }
    if result.key_insights.is_empty() {
        repaired = true;
        result.key_insights = vec![KeyInsight {
            statement: "Insufficient data for detailed insights".to_string(),
            importance: 0.3,
            source_facts: vec![ERROR_RECOVERY.to_string()],
            supporting_evidence: Vec::new(),
        }];
    }

    for contradiction in &mut result.contradictions {
        contradiction.severity = clamp_tracked(contradiction.severity, clamp_unit, &mut repaired);
    }

    result.confidence_score = clamp_tracked(result.confidence_score, clamp_unit, &mut repaired);
    result.completion_status = settle_status(result.completion_status, repaired);
    result
}

pub fn repair_report(output: Option<&ReportOutput>, topic: &str) -> ReportOutput {
    let mut repaired = output.is_none();
    let mut result = output.cloned().unwrap_or_default();

    if result.title.trim().is_empty() {
        repaired = true;
        result.title = format!("Research Report: {}", topic);
    }

    if result.executive_summary.trim().is_empty() {
        repaired = true;
        result.executive_summary = format!(
            "This report covers research on '{}'. Full summary unavailable.",
            topic
        );
    }

    if result.sections.is_empty() {
        repaired = true;
        result.sections = vec![ReportSection::new(
            "Overview",
            format!("This section summarizes the available research on '{}'.", topic),
        )
        .with_gap(ERROR_RECOVERY)];
    }

    if result.created_at.is_none() {
        repaired = true;
        result.created_at = Some(Utc::now());
    }

    result.quality_score = clamp_tracked(result.quality_score, clamp_quality, &mut repaired);
    result.completion_status = settle_status(result.completion_status, repaired);
    result
}
