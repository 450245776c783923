//! Research run state
//!
//! One [`ResearchState`] exists per pipeline run and is owned by the workflow
//! driving it. It is serde-serializable so state stores can persist snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::PipelineError;

/// Pipeline phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    #[default]
    Clarify,
    Brief,
    Draft,
    Supervise,
    Report,
    Completed,
    Failed,
}

impl PipelinePhase {
    fn rank(&self) -> u8 {
        match self {
            Self::Clarify => 0,
            Self::Brief => 1,
            Self::Draft => 2,
            Self::Supervise => 3,
            Self::Report => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clarify => "clarify",
            Self::Brief => "brief",
            Self::Draft => "draft",
            Self::Supervise => "supervise",
            Self::Report => "report",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward moves only; Supervise may repeat and any live phase may fail
    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Supervise if *self == Self::Supervise => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a research, analysis or report step finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Pending,
    Completed,
    CompletedQualityThreshold,
    CompletedMaxIterations,
    CompletedWithErrors,
    CompletedWithRepairs,
    Cancelled,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::CompletedQualityThreshold => "completed_quality_threshold",
            Self::CompletedMaxIterations => "completed_max_iterations",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::CompletedWithRepairs => "completed_with_repairs",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-level lifecycle of a persisted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

/// An extracted claim with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub statement: String,
    pub source_url: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub extracted_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(statement: impl Into<String>, source_url: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            statement: statement.into(),
            source_url: source_url.into(),
            confidence: clamp_unit(confidence),
            tags: BTreeSet::new(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !tag.trim().is_empty() {
            self.tags.insert(tag);
        }
        self
    }

    /// Lowercased leading characters used to spot near-duplicate statements
    pub fn dedup_key(&self) -> String {
        self.statement
            .trim()
            .to_lowercase()
            .chars()
            .take(20)
            .collect()
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub(crate) fn clamp_quality(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 10.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationSource {
    Heuristic,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub justification: String,
}

/// Draft quality on the 0..10 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub overall_score: f64,
    #[serde(default)]
    pub dimensions: Vec<DimensionScore>,
    #[serde(default)]
    pub summary: String,
    pub source: EvaluationSource,
    pub iteration: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityEvaluation {
    pub fn new(overall_score: f64, source: EvaluationSource, iteration: usize) -> Self {
        Self {
            overall_score: clamp_quality(overall_score),
            dimensions: Vec::new(),
            summary: String::new(),
            source,
            iteration,
            evaluated_at: Utc::now(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<DimensionScore>) -> Self {
        self.dimensions = dimensions;
        self
    }
}

/// Red-team finding against the current draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub iteration: usize,
    pub text: String,
    pub severity: f64,
    pub addressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRole {
    Brain,
    Tools,
    System,
}

/// Ordered message log per role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleLogs {
    pub brain: Vec<String>,
    pub tools: Vec<String>,
    pub system: Vec<String>,
}

impl RoleLogs {
    pub fn push(&mut self, role: LogRole, entry: impl Into<String>) {
        let entry = entry.into();
        match role {
            LogRole::Brain => self.brain.push(entry),
            LogRole::Tools => self.tools.push(entry),
            LogRole::System => self.system.push(entry),
        }
    }

    pub fn get(&self, role: LogRole) -> &[String] {
        match role {
            LogRole::Brain => &self.brain,
            LogRole::Tools => &self.tools,
            LogRole::System => &self.system,
        }
    }
}

/// Metadata keys written alongside persisted state
pub mod metadata_keys {
    pub const PHASE: &str = "phase";
    pub const RESEARCH_BRIEF: &str = "research_brief";
    pub const DRAFT_REPORT: &str = "draft_report";
    pub const ANALYSIS_CONFIDENCE: &str = "analysis_confidence";
    pub const REPORT_TITLE: &str = "report_title";
    pub const QUALITY_SCORE: &str = "quality_score";
    pub const FAILURE_REASON: &str = "failure_reason";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub research_id: String,
    pub topic: String,
    #[serde(default)]
    pub research_brief: String,
    pub phase: PipelinePhase,
    pub status: ResearchStatus,
    pub completion: CompletionStatus,
    #[serde(default)]
    pub logs: RoleLogs,
    #[serde(default)]
    pub knowledge_base: Vec<Fact>,
    #[serde(default)]
    pub raw_notes: Vec<String>,
    #[serde(default)]
    pub draft_report: String,
    pub research_iterations: usize,
    pub tool_call_iterations: usize,
    #[serde(default)]
    pub evaluations: Vec<QualityEvaluation>,
    #[serde(default)]
    pub critiques: Vec<Critique>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            research_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            research_brief: String::new(),
            phase: PipelinePhase::default(),
            status: ResearchStatus::default(),
            completion: CompletionStatus::default(),
            logs: RoleLogs::default(),
            knowledge_base: Vec::new(),
            raw_notes: Vec::new(),
            draft_report: String::new(),
            research_iterations: 0,
            tool_call_iterations: 0,
            evaluations: Vec::new(),
            critiques: Vec::new(),
            metadata: BTreeMap::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, research_id: impl Into<String>) -> Self {
        self.research_id = research_id.into();
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.research_brief = brief.into();
        self
    }

    pub fn with_phase(mut self, phase: PipelinePhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to `next`, rejecting backward or post-terminal transitions
    pub fn advance_to(&mut self, next: PipelinePhase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::validation(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        self.set_metadata(metadata_keys::PHASE, next.as_str());
        Ok(())
    }

    /// Append a fact unless one with the same id is present
    pub fn add_fact(&mut self, fact: Fact) -> bool {
        if self.knowledge_base.iter().any(|f| f.id == fact.id) {
            return false;
        }
        self.knowledge_base.push(fact);
        self.touch();
        true
    }

    /// Append a fact unless its id or statement prefix is already known
    pub fn add_fact_dedup(&mut self, fact: Fact) -> bool {
        let key = fact.dedup_key();
        if self.knowledge_base.iter().any(|f| f.dedup_key() == key) {
            return false;
        }
        self.add_fact(fact)
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.raw_notes.push(note.into());
        self.touch();
    }

    pub fn log(&mut self, role: LogRole, entry: impl Into<String>) {
        self.logs.push(role, entry);
    }

    pub fn raw_notes_len(&self) -> usize {
        self.raw_notes.iter().map(|n| n.len()).sum()
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
        self.touch();
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn latest_evaluation(&self) -> Option<&QualityEvaluation> {
        self.evaluations.last()
    }

    pub fn latest_quality(&self) -> Option<f64> {
        self.latest_evaluation().map(|e| e.overall_score)
    }

    pub fn open_critiques(&self) -> impl Iterator<Item = &Critique> {
        self.critiques.iter().filter(|c| !c.addressed)
    }

    pub fn average_confidence(&self) -> f64 {
        if self.knowledge_base.is_empty() {
            return 0.0;
        }
        self.knowledge_base.iter().map(|f| f.confidence).sum::<f64>()
            / self.knowledge_base.len() as f64
    }

    /// Distinct fact sources in first-seen order
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.knowledge_base
            .iter()
            .map(|f| f.source_url.as_str())
            .filter(|s| !s.is_empty() && seen.insert(*s))
            .collect()
    }

    pub fn mark_finished(&mut self, status: ResearchStatus) {
        self.status = status;
        let now = Utc::now();
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progression_is_forward_only() {
        use PipelinePhase::*;

        assert!(Clarify.can_transition_to(Brief));
        assert!(Brief.can_transition_to(Supervise));
        assert!(Supervise.can_transition_to(Supervise));
        assert!(!Draft.can_transition_to(Draft));
        assert!(!Report.can_transition_to(Draft));
        assert!(Draft.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Report));
    }

    #[test]
    fn test_advance_records_phase_metadata() {
        let mut state = ResearchState::new("Quantum Computing");
        state.advance_to(PipelinePhase::Brief).unwrap();
        assert_eq!(state.metadata_str(metadata_keys::PHASE), Some("brief"));

        let err = state.advance_to(PipelinePhase::Clarify).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(state.phase, PipelinePhase::Brief);
    }

    #[test]
    fn test_add_fact_is_idempotent_by_id() {
        let mut state = ResearchState::new("topic");
        let fact = Fact::new("Qubits use superposition", "https://a.example", 0.9);

        assert!(state.add_fact(fact.clone()));
        assert!(!state.add_fact(fact));
        assert_eq!(state.knowledge_base.len(), 1);
    }

    #[test]
    fn test_add_fact_dedup_by_statement_prefix() {
        let mut state = ResearchState::new("topic");
        state.add_fact(Fact::new("Quantum computers use qubits", "a", 0.9));

        assert!(!state.add_fact_dedup(Fact::new("QUANTUM COMPUTERS USE QUBITS heavily", "b", 0.5)));
        assert!(state.add_fact_dedup(Fact::new("Error correction is hard", "c", 0.7)));
        assert_eq!(state.knowledge_base.len(), 2);
    }

    #[test]
    fn test_fact_confidence_is_clamped() {
        assert_eq!(Fact::new("x", "y", 1.7).confidence, 1.0);
        assert_eq!(Fact::new("x", "y", -0.2).confidence, 0.0);
        assert_eq!(Fact::new("x", "y", f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_sources_are_distinct_in_order() {
        let mut state = ResearchState::new("topic");
        state.add_fact(Fact::new("a", "https://one", 0.5));
        state.add_fact(Fact::new("b", "https://two", 0.5));
        state.add_fact(Fact::new("c", "https://one", 0.5));
        state.add_fact(Fact::new("d", "", 0.5));

        assert_eq!(state.sources(), vec!["https://one", "https://two"]);
    }

    #[test]
    fn test_completion_status_serializes_snake_case() {
        let json = serde_json::to_string(&CompletionStatus::CompletedMaxIterations).unwrap();
        assert_eq!(json, "\"completed_max_iterations\"");
        assert_eq!(CompletionStatus::CompletedWithErrors.to_string(), "completed_with_errors");
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = ResearchState::new("Rust async").with_brief("Survey executors");
        state.add_fact(Fact::new("Tokio is multi-threaded", "https://tokio.rs", 0.95).with_tag("runtime"));
        state.log(LogRole::Brain, "research: executors");
        state.set_metadata(metadata_keys::QUALITY_SCORE, 7.5);

        let json = serde_json::to_string(&state).unwrap();
        let restored: ResearchState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
