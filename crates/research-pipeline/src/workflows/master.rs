//! Phase sequencer
//!
//! ```text
//! query ──► Clarify ──► Brief ──► Draft ──► Supervise ──► Report ──► FinalReport
//!              │                              (loop)         │
//!              └─► NeedsClarification                        └─► Analyst ─► Report agent
//! ```
//!
//! Every phase is guarded by the [`RetryExecutor`] with a phase-specific fallback, so
//! a misbehaving dependency degrades the report instead of failing the run. With a
//! [`StateStore`] attached, the run's [`ResearchState`] is written before and after
//! each phase under its research id.

use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::agents::{research_output, AgentRun, AnalystAgent, ReportAgent, ResearchRun, ResearcherAgent};
use super::stream::{PipelineStream, ProgressSink, ProgressSnapshot};
use super::supervisor::SupervisorWorkflow;
use super::transition::{require_topic, StateTransitioner};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{prompt_pair, ModelRole, ModelRouter};
use crate::research::{
    metadata_keys, CompletionStatus, FinalReport, PipelinePhase, ResearchInput, ResearchOutput,
    ResearchPrompts, ResearchState, ResearchStatus, DEFAULT_AUTHOR,
};
use crate::resilience::{RetryExecutor, RetryStats};
use crate::store::{JobRecord, JobStore, MemoryJobStore, StateStore};
use crate::tools::ToolKit;
use crate::validation::{fallback_analysis, fallback_report, fallback_research};

/// Queries containing this marker skip the clarify phase
pub const CLARIFICATION_MARKER: &str = "clarification_provided:";
pub const MIN_QUERY_CHARS: usize = 10;
pub const CLARIFICATION_REQUIRED: &str = "Clarification required";

const DEFAULT_QUESTION: &str =
    "Could you describe in more detail what you would like researched?";
const STREAM_CAPACITY: usize = 32;

/// How a pipeline run ended; only fatal errors are `Err`
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed(FinalReport),
    NeedsClarification { question: String },
    Cancelled { phase: PipelinePhase },
}

impl PipelineOutcome {
    pub fn report(&self) -> Option<&FinalReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn into_report(self) -> Option<FinalReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClarifyVerdict {
    #[serde(default)]
    need_clarification: bool,
    #[serde(default)]
    question: String,
}

/// Mutable per-run bookkeeping
struct RunContext<'a> {
    state: ResearchState,
    sink: Option<&'a ProgressSink>,
    fallbacks: usize,
}

impl<'a> RunContext<'a> {
    fn new(state: ResearchState, sink: Option<&'a ProgressSink>) -> Self {
        Self {
            state,
            sink,
            fallbacks: 0,
        }
    }

    async fn emit(&self, snapshot: ProgressSnapshot) {
        if let Some(sink) = self.sink {
            if !sink.emit(snapshot).await {
                warn!(research_id = %self.state.research_id, "Progress consumer went away");
            }
        }
    }

    fn count<T>(&mut self, run: &AgentRun<T>) {
        self.fallbacks += run.fallbacks_used;
    }
}

pub struct MasterWorkflow {
    router: Arc<ModelRouter>,
    retry: Arc<RetryExecutor>,
    supervisor: Arc<SupervisorWorkflow>,
    researcher: ResearcherAgent,
    analyst: AnalystAgent,
    reporter: ReportAgent,
    transitioner: StateTransitioner,
    store: Option<Arc<dyn StateStore>>,
    jobs: Arc<dyn JobStore>,
    jobs_cancel: CancellationToken,
    author: String,
}

impl MasterWorkflow {
    pub fn new(tools: Arc<ToolKit>, config: &PipelineConfig) -> Self {
        let router = tools.router().clone();
        let retry = Arc::new(RetryExecutor::new(config.retry.clone()));
        let supervisor = Arc::new(SupervisorWorkflow::new(
            tools,
            config.researcher.clone(),
            config.supervisor.clone(),
            retry.clone(),
        ));
        Self {
            researcher: ResearcherAgent::new(supervisor.clone(), router.clone()),
            analyst: AnalystAgent::new(router.clone()),
            reporter: ReportAgent::new(router.clone()),
            transitioner: StateTransitioner::new().with_retry_stats(retry.clone()),
            supervisor,
            router,
            retry,
            store: None,
            jobs: Arc::new(MemoryJobStore::default()),
            jobs_cancel: CancellationToken::new(),
            author: DEFAULT_AUTHOR.to_string(),
        }
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    /// Persisted state for `research_id`, if a store is attached and holds it
    pub async fn state(&self, research_id: &str) -> Result<Option<ResearchState>, PipelineError> {
        match &self.store {
            Some(store) => store.get(research_id).await,
            None => Ok(None),
        }
    }

    async fn persist(&self, state: &ResearchState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.set(&state.research_id, state).await {
                warn!(research_id = %state.research_id, error = %e, "Failed to persist state");
            }
        }
    }

    async fn enter(&self, ctx: &mut RunContext<'_>, phase: PipelinePhase) -> Result<(), PipelineError> {
        ctx.state.advance_to(phase)?;
        ctx.state.touch();
        info!(research_id = %ctx.state.research_id, phase = %phase, "Phase started");
        self.persist(&ctx.state).await;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Query entry points
    // ---------------------------------------------------------------------

    /// Blocking run from a free-text query
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> Result<PipelineOutcome, PipelineError> {
        self.run_query(query, None, cancel, None).await
    }

    /// Blocking run persisted under `research_id`
    pub async fn run_with_id(
        &self,
        query: &str,
        research_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.run_query(query, Some(research_id.to_string()), cancel, None)
            .await
    }

    /// Lazy progress stream; dropping it cancels the run
    pub fn stream_pipeline(self: &Arc<Self>, query: &str, cancel: &CancellationToken) -> PipelineStream {
        let (sink, stream, child) = PipelineStream::channel(STREAM_CAPACITY, cancel);
        let master = Arc::clone(self);
        let query = query.to_string();
        tokio::spawn(async move {
            if let Err(e) = master.run_query(&query, None, &child, Some(&sink)).await {
                warn!(error = %e, "Streaming pipeline failed");
            }
        });
        stream
    }

    async fn run_query(
        &self,
        query: &str,
        research_id: Option<String>,
        cancel: &CancellationToken,
        sink: Option<&ProgressSink>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut state = ResearchState::new(query.trim());
        if let Some(id) = research_id {
            state = state.with_id(id);
        }
        state.status = ResearchStatus::InProgress;
        let mut ctx = RunContext::new(state, sink);

        info!(research_id = %ctx.state.research_id, "Pipeline started");
        ctx.emit(ProgressSnapshot::connected(&ctx.state.research_id)).await;
        self.persist(&ctx.state).await;

        let result = self.drive_query(&mut ctx, query, cancel).await;
        self.finish(&mut ctx, result).await
    }

    async fn drive_query(
        &self,
        ctx: &mut RunContext<'_>,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let id = ctx.state.research_id.clone();

        // 1. clarify
        ctx.emit(ProgressSnapshot::step(&id, 1, PipelinePhase::Clarify, "Checking the request")).await;
        if let Some(question) = self.clarify(ctx, query, cancel).await? {
            return Ok(PipelineOutcome::NeedsClarification { question });
        }

        // 2. brief
        if cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase });
        }
        self.enter(ctx, PipelinePhase::Brief).await?;
        let brief = self.write_brief(ctx, query, cancel).await?;
        ctx.state.research_brief = brief.clone();
        ctx.state.set_metadata(metadata_keys::RESEARCH_BRIEF, brief.as_str());
        self.persist(&ctx.state).await;
        ctx.emit(
            ProgressSnapshot::step(&id, 2, PipelinePhase::Brief, "Research brief ready")
                .with_brief_preview(&brief),
        )
        .await;

        // 3. draft
        if cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase });
        }
        self.enter(ctx, PipelinePhase::Draft).await?;
        let draft = self.write_draft(ctx, &brief, cancel).await?;
        ctx.state.draft_report = draft.clone();
        ctx.state.set_metadata(metadata_keys::DRAFT_REPORT, draft.as_str());
        self.persist(&ctx.state).await;
        ctx.emit(ProgressSnapshot::step(&id, 3, PipelinePhase::Draft, "Initial draft ready").with_draft(draft))
            .await;

        // 4. supervise
        if cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase });
        }
        self.enter(ctx, PipelinePhase::Supervise).await?;
        ctx.emit(ProgressSnapshot::step(&id, 4, PipelinePhase::Supervise, "Supervising research")).await;

        let mut session = self.supervisor.session(ctx.state.clone());
        let mut topics = Vec::new();
        while let Some(update) = session.step(cancel).await {
            topics.extend(update.topics.iter().cloned());
            self.persist(session.state()).await;
            let message = format!("Iteration {} quality {:.1}", update.iteration, update.quality);
            ctx.emit(
                ProgressSnapshot::step(&id, 4, PipelinePhase::Supervise, message).with_supervisor_update(update),
            )
            .await;
        }
        let outcome = session.into_outcome();
        ctx.fallbacks += outcome.fallbacks_used;
        ctx.state = outcome.state.clone();
        self.persist(&ctx.state).await;
        if outcome.completion == CompletionStatus::Cancelled {
            return Ok(PipelineOutcome::Cancelled { phase: PipelinePhase::Supervise });
        }

        // 5. report
        self.enter(ctx, PipelinePhase::Report).await?;
        ctx.emit(ProgressSnapshot::step(&id, 5, PipelinePhase::Report, "Writing final report")).await;
        let research = research_output(&outcome, &topics);
        self.report_phase(ctx, research, true, cancel).await
    }

    async fn clarify(
        &self,
        ctx: &mut RunContext<'_>,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, PipelineError> {
        if query.contains(CLARIFICATION_MARKER) {
            return Ok(None);
        }
        if query.trim().chars().count() < MIN_QUERY_CHARS {
            return Ok(Some(DEFAULT_QUESTION.to_string()));
        }

        let (system, user) = ResearchPrompts::clarify(query);
        let messages = prompt_pair(system, user);
        let messages = &messages;
        let router = &self.router;
        let outcome = self
            .retry
            .run_with_outcome(
                "phase:clarify",
                cancel,
                || async move {
                    router
                        .invoke_structured::<ClarifyVerdict>(ModelRole::Default, messages, cancel)
                        .await
                },
                |_| Ok(ClarifyVerdict::default()),
            )
            .await?;
        if outcome.used_fallback {
            ctx.fallbacks += 1;
        }

        let verdict = outcome.value;
        if !verdict.need_clarification {
            return Ok(None);
        }
        let question = verdict.question.trim();
        Ok(Some(if question.is_empty() {
            DEFAULT_QUESTION.to_string()
        } else {
            question.to_string()
        }))
    }

    async fn guarded_text(
        &self,
        ctx: &mut RunContext<'_>,
        label: &str,
        (system, user): (String, String),
        fallback: String,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let router = &self.router;
        let outcome = self
            .retry
            .run_with_outcome(
                label,
                cancel,
                || router.invoke_text(ModelRole::Default, &system, &user, cancel),
                |_| Ok(String::new()),
            )
            .await?;

        let text = outcome.value.trim().to_string();
        if outcome.used_fallback || text.is_empty() {
            ctx.fallbacks += 1;
            return Ok(fallback);
        }
        Ok(text)
    }

    async fn write_brief(
        &self,
        ctx: &mut RunContext<'_>,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.guarded_text(
            ctx,
            "phase:brief",
            ResearchPrompts::brief(query),
            format!("Research Brief: {}", query.trim()),
            cancel,
        )
        .await
    }

    async fn write_draft(
        &self,
        ctx: &mut RunContext<'_>,
        brief: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.guarded_text(
            ctx,
            "phase:draft",
            ResearchPrompts::initial_draft(brief),
            format!("Initial draft based on: {}", brief),
            cancel,
        )
        .await
    }

    /// Research → Analysis → Report, each boundary validated and repaired
    async fn report_phase(
        &self,
        ctx: &mut RunContext<'_>,
        research: ResearchOutput,
        persist: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let topic = ctx.state.topic.clone();
        let brief = ctx.state.research_brief.clone();

        let (research, analysis_input) =
            self.transitioner
                .research_to_analysis(Some(&research), &topic, &brief)?;
        let research = research.value;

        let analyst = &self.analyst;
        let analysis = self
            .retry
            .run_with_outcome(
                "agent:analyst",
                cancel,
                || analyst.run(&analysis_input, cancel),
                |e| {
                    Ok(AgentRun {
                        output: fallback_analysis(&topic, &e.to_string()),
                        fallbacks_used: 0,
                    })
                },
            )
            .await?;
        if analysis.used_fallback {
            ctx.fallbacks += 1;
        }
        ctx.count(&analysis.value);
        ctx.state.set_metadata(
            metadata_keys::ANALYSIS_CONFIDENCE,
            analysis.value.output.confidence_score,
        );
        if persist {
            self.persist(&ctx.state).await;
        }

        if cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase });
        }

        let (_, report_input) = self.transitioner.analysis_to_report(
            &research,
            Some(&analysis.value.output),
            &topic,
            &self.author,
        )?;

        let reporter = &self.reporter;
        let report = self
            .retry
            .run_with_outcome(
                "agent:report",
                cancel,
                || reporter.run(&report_input, cancel),
                |e| {
                    Ok(AgentRun {
                        output: fallback_report(&topic, &e.to_string()),
                        fallbacks_used: 0,
                    })
                },
            )
            .await?;
        if report.used_fallback {
            ctx.fallbacks += 1;
        }
        ctx.count(&report.value);

        let mut report = self
            .transitioner
            .finalize_report(Some(&report.value.output), &topic)?
            .value;
        if ctx.fallbacks > 0 {
            report.completion_status = CompletionStatus::CompletedWithErrors;
        }
        Ok(PipelineOutcome::Completed(report))
    }

    /// Record the run's end in state, store and stream
    async fn finish(
        &self,
        ctx: &mut RunContext<'_>,
        result: Result<PipelineOutcome, PipelineError>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let id = ctx.state.research_id.clone();
        let result = match result {
            Err(e) if e.is_cancelled() => Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase }),
            other => other,
        };

        match &result {
            Ok(PipelineOutcome::Completed(report)) => {
                if let Err(e) = ctx.state.advance_to(PipelinePhase::Completed) {
                    warn!(research_id = %id, error = %e, "Could not mark run completed");
                }
                ctx.state.completion = report.completion_status;
                ctx.state.set_metadata(metadata_keys::REPORT_TITLE, report.title.as_str());
                ctx.state.set_metadata(metadata_keys::QUALITY_SCORE, report.quality_score);
                ctx.state.mark_finished(ResearchStatus::Completed);
                info!(
                    research_id = %id,
                    quality = report.quality_score,
                    status = %report.completion_status,
                    "Pipeline completed"
                );
                self.persist(&ctx.state).await;
                ctx.emit(ProgressSnapshot::completed(&id, report.clone())).await;
            }
            Ok(PipelineOutcome::NeedsClarification { question }) => {
                ctx.state.set_metadata(metadata_keys::FAILURE_REASON, CLARIFICATION_REQUIRED);
                ctx.state.mark_finished(ResearchStatus::Failed);
                info!(research_id = %id, "Pipeline needs clarification");
                self.persist(&ctx.state).await;
                ctx.emit(ProgressSnapshot::needs_clarification(&id, question.clone())).await;
            }
            Ok(PipelineOutcome::Cancelled { phase }) => {
                ctx.state.completion = CompletionStatus::Cancelled;
                ctx.state.mark_finished(ResearchStatus::Cancelled);
                info!(research_id = %id, phase = %phase, "Pipeline cancelled");
                self.persist(&ctx.state).await;
                ctx.emit(ProgressSnapshot::cancelled(&id, *phase)).await;
            }
            Err(e) => {
                error!(research_id = %id, phase = %ctx.state.phase, error = %e, "Pipeline failed");
                if let Err(transition) = ctx.state.advance_to(PipelinePhase::Failed) {
                    warn!(research_id = %id, error = %transition, "Could not mark run failed");
                }
                ctx.state.completion = CompletionStatus::Failed;
                ctx.state.set_metadata(metadata_keys::ERROR, e.to_string());
                ctx.state.mark_finished(ResearchStatus::Failed);
                self.persist(&ctx.state).await;
                ctx.emit(ProgressSnapshot::error(&id, e)).await;
            }
        }
        result
    }

    // ---------------------------------------------------------------------
    // Topic-and-brief entry points
    // ---------------------------------------------------------------------

    /// Research → Analysis → Report for a known topic and brief
    pub async fn execute_full_pipeline(
        &self,
        topic: &str,
        brief: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.execute_research(ResearchInput::new(topic, brief), None, false, cancel)
            .await
    }

    /// Like [`Self::execute_full_pipeline`], persisting a snapshot around each phase
    pub async fn execute_full_pipeline_with_state(
        &self,
        topic: &str,
        brief: &str,
        research_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.execute_research(
            ResearchInput::new(topic, brief),
            research_id.map(str::to_string),
            true,
            cancel,
        )
        .await
    }

    /// Topic-and-brief pipeline with explicit research limits
    pub async fn execute_research(
        &self,
        input: ResearchInput,
        research_id: Option<String>,
        persist: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        require_topic(&input.topic)?;

        let mut state = ResearchState::new(input.topic.clone())
            .with_brief(input.research_brief.clone())
            .with_phase(PipelinePhase::Supervise);
        if let Some(id) = research_id {
            state = state.with_id(id);
        }
        state.status = ResearchStatus::InProgress;
        state.set_metadata(metadata_keys::RESEARCH_BRIEF, input.research_brief.as_str());

        let mut ctx = RunContext::new(state, None);
        let result = self.drive_research(&mut ctx, &input, persist, cancel).await;

        if persist {
            self.finish(&mut ctx, result).await
        } else {
            match result {
                Err(e) if e.is_cancelled() => Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase }),
                other => other,
            }
        }
    }

    async fn drive_research(
        &self,
        ctx: &mut RunContext<'_>,
        input: &ResearchInput,
        persist: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(research_id = %ctx.state.research_id, topic = %input.topic, "Research pipeline started");
        if persist {
            self.persist(&ctx.state).await;
        }

        let researcher = &self.researcher;
        let start = &ctx.state;
        let outcome = self
            .retry
            .run_with_outcome(
                "agent:researcher",
                cancel,
                || async move {
                    researcher
                        .research(input, start.clone(), cancel)
                        .await
                        .map(Ok::<ResearchRun, String>)
                },
                |e| Ok(Err(e.to_string())),
            )
            .await?;

        let research = match outcome.value {
            Ok(run) => {
                ctx.fallbacks += run.fallbacks_used;
                ctx.state = run.outcome.state;
                run.output
            }
            Err(reason) => {
                ctx.fallbacks += 1;
                fallback_research(&input.topic, &reason)
            }
        };

        if persist {
            self.persist(&ctx.state).await;
        }
        if cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled { phase: ctx.state.phase });
        }

        ctx.state.advance_to(PipelinePhase::Report)?;
        if persist {
            self.persist(&ctx.state).await;
        }
        self.report_phase(ctx, research, persist, cancel).await
    }

    // ---------------------------------------------------------------------
    // Fire-and-forget jobs
    // ---------------------------------------------------------------------

    /// Queue a run in the background; returns the job id, which doubles as research id
    pub async fn submit(self: &Arc<Self>, query: &str) -> Result<String, PipelineError> {
        let mut record = JobRecord::new(query);
        let id = record.id.clone();
        self.jobs.insert(record.clone()).await?;

        let master = Arc::clone(self);
        let cancel = self.jobs_cancel.child_token();
        tokio::spawn(async move {
            record.start();
            if let Err(e) = master.jobs.update(record.clone()).await {
                warn!(job_id = %record.id, error = %e, "Failed to mark job running");
            }

            match master.run_with_id(&record.query, &record.id, &cancel).await {
                Ok(PipelineOutcome::Completed(report)) => record.complete(report),
                Ok(PipelineOutcome::NeedsClarification { question }) => {
                    record.fail(format!("{}: {}", CLARIFICATION_REQUIRED, question))
                }
                Ok(PipelineOutcome::Cancelled { .. }) => record.cancel(),
                Err(e) => record.fail(e.to_string()),
            }

            info!(job_id = %record.id, status = ?record.status, "Job finished");
            master.store_job_result(record).await;
        });

        Ok(id)
    }

    /// A record purged or removed mid-run is inserted again so the result stays readable
    async fn store_job_result(&self, record: JobRecord) {
        let id = record.id.clone();
        let stored = match self.jobs.update(record.clone()).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(job_id = %id, "Job record vanished before its result was stored; re-inserting");
                self.jobs.insert(record).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(job_id = %id, error = %e, "Failed to store job result");
        }
    }

    pub async fn job(&self, id: &str) -> Result<Option<JobRecord>, PipelineError> {
        self.jobs.get(id).await
    }

    pub async fn remove_job(&self, id: &str) -> Result<Option<JobRecord>, PipelineError> {
        self.jobs.remove(id).await
    }

    pub async fn purge_expired_jobs(&self) -> Result<usize, PipelineError> {
        self.jobs.purge_expired().await
    }

    /// Cancel every running job
    pub fn cancel_jobs(&self) {
        self.jobs_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitRegistry, DependencyGuard, RetryPolicy};
    use crate::store::{JobStatus, MemoryStateStore};
    use crate::testing::{ScriptedProvider, StaticScraper, StaticSearch};
    use crate::validation::ERROR_RECOVERY;
    use std::time::Duration;

    const FACTS: &str = r#"{"facts": [
        {"statement": "Qubits can be entangled", "confidence": 0.9, "source": "https://a.example", "category": "physics"}
    ]}"#;

    const REPORT: &str = r#"{"title": "Quantum Computing Today", "executive_summary": "Summary",
        "sections": [{"heading": "Hardware", "content": "Body"}]}"#;

    fn happy_provider() -> ScriptedProvider {
        ScriptedProvider::new("ok")
            .with_rule("You screen research requests", r#"{"need_clarification": false, "question": ""}"#)
            .with_rule("concise research brief", "Brief: quantum hardware in 2025")
            .with_rule("short initial draft", "Draft v0")
            .with_rule("Break a research topic", r#"["qubits"]"#)
            .with_rule("direct a research loop", "search for qubits")
            .with_rule("Extract verifiable facts", FACTS)
            .with_rule("adversarial reviewer", "PASS")
            .with_rule("recurring themes", r#"["hardware"]"#)
            .with_rule("contradict", "[]")
            .with_rule("how important each fact", "[0.8]")
            .with_rule("synthesis narrative", "Narrative")
            .with_rule("final research report", REPORT)
    }

    fn master(provider: ScriptedProvider) -> MasterWorkflow {
        let config = PipelineConfig::default()
            .with_retry(RetryPolicy::new(1).with_fixed_delay(Duration::from_millis(1)))
            .with_researcher(crate::config::ResearcherConfig::default().with_max_iterations(1).with_max_queries(1))
            .with_supervisor(
                crate::config::SupervisorConfig::default()
                    .with_max_iterations(2)
                    .with_min_quality(10.0),
            );
        let registry = CircuitRegistry::new(CircuitBreakerConfig::disabled());
        let router = Arc::new(ModelRouter::new(
            Arc::new(provider),
            DependencyGuard::from_registry("llm", &registry, 8),
        ));
        let tools = Arc::new(ToolKit::new(
            router,
            Arc::new(StaticSearch::with_urls(&["https://a.example"])),
            Arc::new(StaticScraper::with_summaries()),
            &registry,
            8,
        ));
        MasterWorkflow::new(tools, &config)
    }

    #[tokio::test]
    async fn test_query_pipeline_completes() {
        let store = Arc::new(MemoryStateStore::new());
        let master = master(happy_provider()).with_state_store(store.clone());

        let outcome = master
            .run_with_id("Quantum computing hardware in 2025", "run-1", &CancellationToken::new())
            .await
            .unwrap();

        let report = outcome.report().unwrap();
        assert_eq!(report.title, "Quantum Computing Today");
        assert_eq!(report.completion_status, CompletionStatus::Completed);
        assert!(!report.citations.is_empty());

        let stored = store.get("run-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ResearchStatus::Completed);
        assert_eq!(stored.phase, PipelinePhase::Completed);
        assert_eq!(stored.research_iterations, 2);
        assert_eq!(
            stored.metadata_str(metadata_keys::REPORT_TITLE),
            Some("Quantum Computing Today")
        );
        assert!(stored.metadata.contains_key(metadata_keys::QUALITY_SCORE));
    }

    #[tokio::test]
    async fn test_short_query_needs_clarification() {
        let store = Arc::new(MemoryStateStore::new());
        let master = master(happy_provider()).with_state_store(store.clone());

        let outcome = master.run_with_id("AI", "short", &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::NeedsClarification { .. }));
        let stored = store.get("short").await.unwrap().unwrap();
        assert_eq!(stored.status, ResearchStatus::Failed);
        assert_eq!(
            stored.metadata_str(metadata_keys::FAILURE_REASON),
            Some(CLARIFICATION_REQUIRED)
        );
    }

    #[tokio::test]
    async fn test_clarification_marker_skips_clarify() {
        let provider = happy_provider().with_rule(
            "You screen research requests",
            r#"{"need_clarification": true, "question": "Which?"}"#,
        );
        let master = master(provider);

        let outcome = master
            .run("AI clarification_provided: chips", &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.report().is_some());
    }

    #[tokio::test]
    async fn test_llm_asks_for_clarification() {
        let provider = ScriptedProvider::new("ok").with_rule(
            "You screen research requests",
            r#"{"need_clarification": true, "question": "Which industry?"}"#,
        );
        let master = master(provider);

        let outcome = master
            .run("Tell me about adoption trends", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::NeedsClarification {
                question: "Which industry?".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dead_llm_still_produces_report_with_errors() {
        let master = master(ScriptedProvider::failing("model offline"));

        let outcome = master
            .run("Quantum computing hardware in 2025", &CancellationToken::new())
            .await
            .unwrap();

        let report = outcome.into_report().unwrap();
        assert_eq!(report.completion_status, CompletionStatus::CompletedWithErrors);
        assert!(report.title.contains("Error Recovery"));
        assert!(master.retry_stats().total_fallbacks > 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let master = master(happy_provider());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = master
            .run("Quantum computing hardware in 2025", &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_execute_full_pipeline_rejects_empty_topic() {
        let master = master(happy_provider());

        let err = master
            .execute_full_pipeline("   ", "brief", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_execute_full_pipeline_with_state_persists() {
        let store = Arc::new(MemoryStateStore::new());
        let master = master(happy_provider()).with_state_store(store.clone());

        let outcome = master
            .execute_full_pipeline_with_state(
                "Quantum Computing",
                "Quantum hardware",
                Some("topic-run"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let report = outcome.report().unwrap();
        assert!(!report.sections.is_empty());
        let stored = store.get("topic-run").await.unwrap().unwrap();
        assert_eq!(stored.status, ResearchStatus::Completed);
        assert!(!stored.knowledge_base.is_empty());
        assert!(stored
            .knowledge_base
            .iter()
            .all(|f| f.source_url != ERROR_RECOVERY));
    }

    /// Keeps every snapshot written, in order
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStateStore,
        writes: std::sync::Mutex<Vec<ResearchState>>,
    }

    #[async_trait::async_trait]
    impl StateStore for RecordingStore {
        async fn get(&self, research_id: &str) -> Result<Option<ResearchState>, PipelineError> {
            self.inner.get(research_id).await
        }

        async fn set(&self, research_id: &str, state: &ResearchState) -> Result<(), PipelineError> {
            self.writes.lock().unwrap().push(state.clone());
            self.inner.set(research_id, state).await
        }

        async fn delete(&self, research_id: &str) -> Result<bool, PipelineError> {
            self.inner.delete(research_id).await
        }

        async fn list_ids(&self) -> Result<Vec<String>, PipelineError> {
            self.inner.list_ids().await
        }
    }

    #[tokio::test]
    async fn test_analysis_is_persisted_before_report() {
        let store = Arc::new(RecordingStore::default());
        let master = master(happy_provider()).with_state_store(store.clone());

        master
            .execute_full_pipeline_with_state(
                "Quantum Computing",
                "Quantum hardware",
                Some("phased-run"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let writes = store.writes.lock().unwrap();
        let between = writes.iter().find(|s| {
            s.metadata.contains_key(metadata_keys::ANALYSIS_CONFIDENCE)
                && !s.metadata.contains_key(metadata_keys::REPORT_TITLE)
        });
        assert!(between.is_some());
        assert_eq!(between.unwrap().phase, PipelinePhase::Report);
        assert_eq!(writes.last().unwrap().status, ResearchStatus::Completed);
    }

    #[tokio::test]
    async fn test_submitted_job_completes() {
        let master = Arc::new(master(happy_provider()));

        let id = master.submit("Quantum computing hardware in 2025").await.unwrap();

        let mut record = master.job(&id).await.unwrap().unwrap();
        for _ in 0..200 {
            if record.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            record = master.job(&id).await.unwrap().unwrap();
        }
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.report.is_some());
        assert!(master.remove_job(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_job_result_survives_record_loss() {
        let master = Arc::new(master(happy_provider()));

        let id = master.submit("Quantum computing hardware in 2025").await.unwrap();
        assert!(master.remove_job(&id).await.unwrap().is_some());

        let mut record = None;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            record = master.job(&id).await.unwrap();
            if record.as_ref().is_some_and(|r| r.status.is_terminal()) {
                break;
            }
        }
        let record = record.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.report.is_some());
    }
}
