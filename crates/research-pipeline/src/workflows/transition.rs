//! Phase-boundary mapping
//!
//! Validates the previous agent's output, repairs it when validation fails, and
//! builds the next agent's input. An empty topic is a fatal validation error.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::research::{AnalysisInput, AnalysisOutput, ReportInput, ReportOutput, ResearchOutput};
use crate::resilience::RetryExecutor;
use crate::validation::{
    repair_analysis, repair_report, repair_research, validate_analysis, validate_report,
    validate_research, ValidationReport,
};

/// Next-phase input plus what happened at the boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    pub value: T,
    pub repaired: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StateTransitioner {
    retry: Option<Arc<RetryExecutor>>,
}

/// Fatal validation error for a blank topic
pub fn require_topic(topic: &str) -> Result<(), PipelineError> {
    if topic.trim().is_empty() {
        return Err(PipelineError::validation(
            "topic must not be empty at a phase boundary",
        ));
    }
    Ok(())
}

impl StateTransitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count repairs in the executor's stats
    pub fn with_retry_stats(mut self, retry: Arc<RetryExecutor>) -> Self {
        self.retry = Some(retry);
        self
    }

    fn checked<T>(
        &self,
        stage: &str,
        value: Option<&T>,
        validate: fn(&T) -> ValidationReport,
        repair: impl FnOnce(Option<&T>) -> T,
    ) -> Transition<T>
    where
        T: Clone,
    {
        let report = value.map(validate);
        let warnings = report
            .as_ref()
            .map(|r| r.warnings.clone())
            .unwrap_or_default();
        for warning in &warnings {
            debug!(stage, warning = %warning, "Validation warning");
        }

        match (value, report) {
            (Some(value), Some(report)) if report.is_valid() => Transition {
                value: value.clone(),
                repaired: false,
                warnings,
            },
            (value, report) => {
                let errors = report.map(|r| r.errors).unwrap_or_else(|| vec!["missing output".to_string()]);
                warn!(stage, errors = ?errors, "Output failed validation, repairing");
                if let Some(retry) = &self.retry {
                    retry.record_repair();
                }
                Transition {
                    value: repair(value),
                    repaired: true,
                    warnings,
                }
            }
        }
    }

    /// Research → Analysis
    pub fn research_to_analysis(
        &self,
        research: Option<&ResearchOutput>,
        topic: &str,
        research_brief: &str,
    ) -> Result<(Transition<ResearchOutput>, AnalysisInput), PipelineError> {
        require_topic(topic)?;
        let research = self.checked("research", research, validate_research, |r| {
            repair_research(r, topic)
        });
        let input = AnalysisInput {
            findings: research.value.findings.clone(),
            research_brief: research_brief.to_string(),
            topic: topic.to_string(),
        };
        Ok((research, input))
    }

    /// Analysis → Report
    pub fn analysis_to_report(
        &self,
        research: &ResearchOutput,
        analysis: Option<&AnalysisOutput>,
        topic: &str,
        author: &str,
    ) -> Result<(Transition<AnalysisOutput>, ReportInput), PipelineError> {
        require_topic(topic)?;
        let analysis = self.checked("analysis", analysis, validate_analysis, |a| {
            repair_analysis(a, topic)
        });
        let input = ReportInput {
            research: research.clone(),
            analysis: analysis.value.clone(),
            topic: topic.to_string(),
            author: author.to_string(),
        };
        Ok((analysis, input))
    }

    /// Final check on the report before it leaves the pipeline
    pub fn finalize_report(
        &self,
        report: Option<&ReportOutput>,
        topic: &str,
    ) -> Result<Transition<ReportOutput>, PipelineError> {
        require_topic(topic)?;
        Ok(self.checked("report", report, validate_report, |r| repair_report(r, topic)))
    }
}
