//! Research data model and prompt templates

pub mod models;
pub mod prompts;
pub mod state;

pub use models::{
    AnalysisInput, AnalysisOutput, Citation, Contradiction, DraftReport, ExtractedFact,
    FactExtractionResult, FinalReport, KeyInsight, ReportInput, ReportOutput, ReportSection,
    ResearchInput, ResearchOutput, DEFAULT_AUTHOR,
};
pub use prompts::ResearchPrompts;
pub use state::{
    metadata_keys, CompletionStatus, Critique, DimensionScore, EvaluationSource, Fact, LogRole,
    PipelinePhase, QualityEvaluation, ResearchState, ResearchStatus, RoleLogs,
};
