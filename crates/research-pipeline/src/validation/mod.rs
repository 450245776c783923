//! Output validation, repair and fallback construction
//!
//! Validation and repair are independent, pure functions. Validation reports
//! problems without touching the value; repair always returns a new, structurally
//! complete value and never re-validates. Callers compose the two explicitly (see
//! `StateTransitioner`).
//!
//! Fallback constructors build the minimal-but-valid outputs used when every retry
//! of an agent call failed.

mod fallback;
mod repair;

pub use fallback::{fallback_analysis, fallback_report, fallback_research, ERROR_RECOVERY};
pub use repair::{repair_analysis, repair_report, repair_research};

use serde::Serialize;

use crate::research::{AnalysisOutput, ReportOutput, ResearchOutput};

/// Quality below this floor produces a warning
pub const RECOMMENDED_QUALITY_FLOOR: f64 = 5.0;

/// Contradictions at or above this severity are worth flagging
pub const HIGH_SEVERITY: f64 = 0.7;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

fn in_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn in_quality(value: f64) -> bool {
    (0.0..=10.0).contains(&value)
}

pub fn validate_research(output: &ResearchOutput) -> ValidationReport {
    let mut report = ValidationReport::default();

    if output.findings.is_empty() {
        report.error("research output has no findings");
    }

    for (i, finding) in output.findings.iter().enumerate() {
        if finding.facts.is_empty() {
            report.error(format!("finding {} has no facts", i));
        }
        for (j, fact) in finding.facts.iter().enumerate() {
            if fact.statement.trim().is_empty() {
                report.error(format!("finding {} fact {} has an empty statement", i, j));
            }
            if !in_unit(fact.confidence) {
                report.error(format!(
                    "finding {} fact {} confidence {} outside 0..1",
                    i, j, fact.confidence
                ));
            }
        }
    }

    if !in_quality(output.average_quality) {
        report.error(format!(
            "average quality {} outside 0..10",
            output.average_quality
        ));
    } else if output.average_quality < RECOMMENDED_QUALITY_FLOOR {
        report.warn(format!(
            "quality {:.1} below recommended floor {:.1}",
            output.average_quality, RECOMMENDED_QUALITY_FLOOR
        ));
    }

    report
}

pub fn validate_analysis(output: &AnalysisOutput) -> ValidationReport {
    let mut report = ValidationReport::default();

    if output.synthesis_narrative.trim().is_empty() {
        report.error("analysis narrative is empty");
    }
    if output.key_insights.is_empty() {
        report.error("analysis has no key insights");
    }
    if !in_unit(output.confidence_score) {
        report.error(format!(
            "confidence score {} outside 0..1",
            output.confidence_score
        ));
    }

    if output.themes_identified.is_empty() {
        report.warn("no themes identified");
    }
    let severe = output
        .contradictions
        .iter()
        .filter(|c| c.severity >= HIGH_SEVERITY)
        .count();
    if severe > 0 {
        report.warn(format!("{} unresolved high-severity contradictions", severe));
    }

    report
}

pub fn validate_report(output: &ReportOutput) -> ValidationReport {
    let mut report = ValidationReport::default();

    if output.title.trim().is_empty() {
        report.error("report title is empty");
    }
    if output.executive_summary.trim().is_empty() {
        report.error("executive summary is empty");
    }
    if output.sections.is_empty() {
        report.error("report has no sections");
    }
    if output.created_at.is_none() {
        report.error("report has no creation timestamp");
    }

    if !in_quality(output.quality_score) {
        report.error(format!("quality score {} outside 0..10", output.quality_score));
    } else if output.quality_score < RECOMMENDED_QUALITY_FLOOR {
        report.warn(format!(
            "quality {:.1} below recommended floor {:.1}",
            output.quality_score, RECOMMENDED_QUALITY_FLOOR
        ));
    }
    if output.citations.is_empty() {
        report.warn("report has no citations");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{
        CompletionStatus, Contradiction, ExtractedFact, FactExtractionResult, KeyInsight,
        ReportSection,
    };
    use chrono::Utc;

    fn good_research() -> ResearchOutput {
        ResearchOutput {
            findings: vec![FactExtractionResult::new(vec![ExtractedFact::new(
                "Qubits exploit superposition",
                "https://example.org/qubits",
                0.9,
                "physics",
            )])],
            average_quality: 7.5,
            iterations_used: 2,
            research_topics_covered: vec!["Quantum Computing".to_string()],
            completion_status: CompletionStatus::CompletedMaxIterations,
        }
    }

    #[test]
    fn test_valid_research_has_no_errors() {
        let report = validate_research(&good_research());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_research_errors_and_warnings() {
        let mut output = good_research();
        output.findings.push(FactExtractionResult::default());
        output.findings[0].facts[0].confidence = 1.4;
        output.average_quality = 3.0;

        let report = validate_research(&output);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("below recommended floor"));
    }

    #[test]
    fn test_empty_research_is_invalid() {
        let report = validate_research(&ResearchOutput::default());
        assert!(report.errors.iter().any(|e| e.contains("no findings")));
    }

    #[test]
    fn test_analysis_warnings() {
        let output = AnalysisOutput {
            synthesis_narrative: "Narrative".to_string(),
            key_insights: vec![KeyInsight {
                statement: "Insight".to_string(),
                importance: 0.8,
                ..Default::default()
            }],
            contradictions: vec![Contradiction {
                fact_1: "a".to_string(),
                fact_2: "b".to_string(),
                severity: 0.9,
                explanation: "conflict".to_string(),
            }],
            confidence_score: 0.7,
            themes_identified: vec![],
            completion_status: CompletionStatus::Completed,
        };

        let report = validate_analysis(&output);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_analysis_errors() {
        let report = validate_analysis(&AnalysisOutput {
            confidence_score: 2.0,
            ..Default::default()
        });
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn test_report_validation() {
        let mut output = ReportOutput {
            title: "Research Report: Rust".to_string(),
            executive_summary: "Summary".to_string(),
            sections: vec![ReportSection::new("Overview", "Body")],
            citations: vec![],
            quality_score: 8.0,
            created_at: Some(Utc::now()),
            completion_status: CompletionStatus::Completed,
        };
        let report = validate_report(&output);
        assert!(report.is_valid());
        assert_eq!(report.warnings, vec!["report has no citations".to_string()]);

        output.created_at = None;
        output.quality_score = 11.0;
        let report = validate_report(&output);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_validation_never_mutates() {
        let output = ResearchOutput::default();
        let before = output.clone();
        let _ = validate_research(&output);
        assert_eq!(output, before);
    }
}
