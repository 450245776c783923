//! Minimal-valid outputs for exhausted retries

use chrono::Utc;

use crate::research::{
    AnalysisOutput, CompletionStatus, ExtractedFact, FactExtractionResult, KeyInsight,
    ReportOutput, ReportSection, ResearchOutput,
};

/// Marker carried by every synthesized value
pub const ERROR_RECOVERY: &str = "error_recovery";

/// Lowest non-zero quality
const FALLBACK_QUALITY: f64 = 1.0;

pub fn fallback_research(topic: &str, reason: &str) -> ResearchOutput {
    ResearchOutput {
        findings: vec![FactExtractionResult::new(vec![ExtractedFact::new(
            format!(
                "Research on '{}' could not be completed due to an error: {}",
                topic, reason
            ),
            ERROR_RECOVERY,
            0.1,
            "error",
        )])],
        average_quality: FALLBACK_QUALITY,
        iterations_used: 0,
        research_topics_covered: vec![topic.to_string()],
        completion_status: CompletionStatus::CompletedWithErrors,
    }
}

pub fn fallback_analysis(topic: &str, reason: &str) -> AnalysisOutput {
    AnalysisOutput {
        synthesis_narrative: format!(
            "Analysis on '{}' could not be completed due to an error: {}",
            topic, reason
        ),
        key_insights: vec![KeyInsight {
            statement: "Analysis failed - fallback data".to_string(),
            importance: 0.1,
            source_facts: vec![ERROR_RECOVERY.to_string()],
            supporting_evidence: Vec::new(),
        }],
        contradictions: Vec::new(),
        confidence_score: 0.1,
        themes_identified: vec![ERROR_RECOVERY.to_string()],
        completion_status: CompletionStatus::CompletedWithErrors,
    }
}

pub fn fallback_report(topic: &str, reason: &str) -> ReportOutput {
    ReportOutput {
        title: format!("Research Report: {} (Error Recovery)", topic),
        executive_summary: format!(
            "The report on '{}' could not be generated normally due to an error: {}",
            topic, reason
        ),
        sections: vec![ReportSection::new(
            "Error Notice",
            format!(
                "Report generation for '{}' failed and this minimal report was produced instead. \
                 Cause: {}",
                topic, reason
            ),
        )
        .with_gap(ERROR_RECOVERY)],
        citations: Vec::new(),
        quality_score: FALLBACK_QUALITY,
        created_at: Some(Utc::now()),
        completion_status: CompletionStatus::CompletedWithErrors,
    }
}
