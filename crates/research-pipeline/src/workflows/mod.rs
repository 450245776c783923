//! Research workflows
//!
//! - [`ResearcherWorkflow`]: tool-calling loop for one topic
//! - [`SupervisorWorkflow`]: iterative brain / tools / quality / red team / prune loop
//! - [`agents`]: research, analysis and report agents
//! - [`StateTransitioner`]: validation and repair at phase boundaries
//! - [`MasterWorkflow`]: phase sequencer with persistence, streaming and jobs

pub mod agents;
pub mod master;
pub mod metrics;
pub mod researcher;
pub mod stream;
pub mod supervisor;
pub mod transition;

pub use agents::{AgentRun, AnalystAgent, ReportAgent, ResearchRun, ResearcherAgent};
pub use master::{MasterWorkflow, PipelineOutcome, CLARIFICATION_MARKER};
pub use metrics::{research_metrics, ResearchMetrics};
pub use researcher::ResearcherWorkflow;
pub use stream::{PipelineStream, ProgressSink, ProgressSnapshot, StreamStatus};
pub use supervisor::{SupervisorOutcome, SupervisorSession, SupervisorUpdate, SupervisorWorkflow};
pub use transition::{StateTransitioner, Transition};
