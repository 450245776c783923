//! research-pipeline: fault-tolerant deep-research orchestration for Rig
//!
//! A query moves through Clarify → Brief → Draft → Supervise → Report. The
//! supervision loop repeatedly decides what to research, runs tool-calling
//! researchers in parallel, scores the draft and red-teams it. Every external call
//! sits behind retries, a per-dependency circuit breaker and a concurrency gate, so
//! the pipeline nearly always ends with *some* report.
//!
//! - `RetryExecutor`: bounded retries with fallback on exhaustion
//! - `CircuitBreaker` / `ConcurrencyGate`: failure-rate tripping and in-flight limits
//! - `validation`: pure validate / repair / fallback for agent outputs
//! - `ResearcherWorkflow`, `SupervisorWorkflow`, `MasterWorkflow`: the loops
//! - `RigAgentAdapter`: any Rig agent as an `LLMProvider`
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use research_pipeline::{
//!     CircuitRegistry, DependencyGuard, HttpScraper, MasterWorkflow, ModelRouter,
//!     PipelineConfig, RigAgentAdapter, TavilySearchClient, ToolKit,
//! };
//!
//! let config = PipelineConfig::default();
//! let registry = CircuitRegistry::new(config.circuit.clone());
//! let llm = DependencyGuard::from_registry("llm", &registry, config.gate.max_concurrent_tasks);
//! let router = Arc::new(ModelRouter::new(Arc::new(RigAgentAdapter::new(agent)), llm));
//! let tools = Arc::new(ToolKit::new(
//!     router,
//!     Arc::new(TavilySearchClient::from_env()?),
//!     Arc::new(HttpScraper::new()?),
//!     &registry,
//!     config.gate.max_concurrent_tasks,
//! ));
//! let master = MasterWorkflow::new(tools, &config);
//! let outcome = master.run("State of quantum error correction", &cancel).await?;
//! ```

pub mod compat;
pub mod config;
pub mod error;
pub mod llm;
pub mod research;
pub mod resilience;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod text;
pub mod tools;
pub mod validation;
pub mod workflows;

pub use compat::RigAgentAdapter;
pub use config::{PipelineConfig, ResearcherConfig, SupervisorConfig};
pub use error::PipelineError;
pub use llm::{LLMConfig, LLMProvider, LLMResponse, Message, ModelNames, ModelRole, ModelRouter, Role, TokenUsage};
pub use research::{
    AnalysisInput, AnalysisOutput, CompletionStatus, DraftReport, Fact, FinalReport,
    PipelinePhase, QualityEvaluation, ReportInput, ReportOutput, ResearchInput, ResearchOutput,
    ResearchState, ResearchStatus,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, ConcurrencyGate,
    DependencyGuard, GateConfig, RetryExecutor, RetryPolicy, RetryStats,
};
pub use store::{
    FileStateStore, JobRecord, JobStatus, JobStore, MemoryJobStore, MemoryStateStore, StateStore,
};
pub use tools::{
    Embedder, HashingEmbedder, HttpScraper, MemoryVectorStore, ResearchTool, Scraper,
    SearchClient, TavilySearchClient, ToolKit, VectorStore,
};
pub use validation::ValidationReport;
pub use workflows::{
    research_metrics, MasterWorkflow, PipelineOutcome, PipelineStream, ProgressSnapshot,
    ResearchMetrics, ResearcherWorkflow, StreamStatus, SupervisorOutcome, SupervisorUpdate,
    SupervisorWorkflow,
};
