//! Integration tests for the full research pipeline
//!
//! Every collaborator is scripted, so these run without a model or network:
//! - Supervisor loop hitting its iteration cap on an unreachable threshold
//! - Repair of missing research output at the analysis boundary
//! - Streaming: connected first, exactly one terminal snapshot last
//! - File-backed persistence of the final state and its metadata
//! - Background jobs and TTL purge

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use research_pipeline::research::metadata_keys;
use research_pipeline::testing::{ScriptedProvider, StaticScraper, StaticSearch};
use research_pipeline::workflows::{ResearcherAgent, StateTransitioner};
use research_pipeline::{
    CircuitBreakerConfig, CircuitRegistry, CompletionStatus, DependencyGuard, FileStateStore,
    JobStatus, MasterWorkflow, MemoryJobStore, ModelRouter, PipelineConfig, PipelinePhase,
    ResearchInput, ResearchStatus, ResearcherConfig, RetryExecutor, RetryPolicy, StateStore,
    StreamStatus, SupervisorConfig, SupervisorWorkflow, ToolKit,
};

const FACTS: &str = r#"{"facts": [
    {"statement": "Superconducting qubits need millikelvin cooling", "confidence": 0.9, "source": "https://qc.example/cooling", "category": "hardware"},
    {"statement": "Surface codes tolerate roughly 1% gate error", "confidence": 0.7, "source": "https://qc.example/codes", "category": "error correction"}
]}"#;

const REPORT: &str = r#"{"title": "Quantum Computing: State of the Field",
    "executive_summary": "Hardware is improving while error correction matures.",
    "sections": [{"heading": "Hardware", "content": "Cooling dominates cost."}],
    "conclusions": "Fault tolerance remains the milestone to watch."}"#;

fn scripted_llm() -> ScriptedProvider {
    ScriptedProvider::new("ok")
        .with_rule("You screen research requests", r#"{"need_clarification": false, "question": ""}"#)
        .with_rule("concise research brief", "Survey quantum hardware and error correction")
        .with_rule("short initial draft", "Initial draft")
        .with_rule("Break a research topic", r#"["quantum hardware", "error correction"]"#)
        .with_rule("direct a research loop", "research: quantum error correction")
        .with_rule("Extract verifiable facts", FACTS)
        .with_rule("You grade research drafts", r#"{"overall_score": 6.0}"#)
        .with_rule("adversarial reviewer", "PASS")
        .with_rule("recurring themes", r#"["hardware", "error correction"]"#)
        .with_rule("contradict", "[]")
        .with_rule("how important each fact", "[0.9, 0.6]")
        .with_rule("synthesis narrative", "Cooling and error rates shape the roadmap.")
        .with_rule("final research report", REPORT)
}

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retry(RetryPolicy::new(1).with_fixed_delay(Duration::from_millis(1)))
        .with_researcher(ResearcherConfig::default().with_max_iterations(1).with_max_queries(1))
        .with_supervisor(
            SupervisorConfig::default()
                .with_max_iterations(2)
                .with_min_quality(10.0),
        )
}

fn toolkit(provider: ScriptedProvider) -> Arc<ToolKit> {
    let registry = CircuitRegistry::new(CircuitBreakerConfig::disabled());
    let router = Arc::new(ModelRouter::new(
        Arc::new(provider),
        DependencyGuard::from_registry("llm", &registry, 8),
    ));
    Arc::new(ToolKit::new(
        router,
        Arc::new(StaticSearch::with_urls(&["https://qc.example/cooling"])),
        Arc::new(StaticScraper::with_summaries()),
        &registry,
        8,
    ))
}

#[tokio::test]
async fn test_quantum_research_runs_to_iteration_cap() {
    let config = config();
    let tools = toolkit(scripted_llm());
    let supervisor = Arc::new(SupervisorWorkflow::new(
        tools.clone(),
        config.researcher.clone(),
        config.supervisor.clone(),
        Arc::new(RetryExecutor::new(config.retry.clone())),
    ));
    let agent = ResearcherAgent::new(supervisor, tools.router().clone());

    let mut input = ResearchInput::new("Quantum Computing", "Hardware and error correction");
    input.max_iterations = 2;
    input.min_quality_threshold = 10.0;

    let run = agent.run(&input, &CancellationToken::new()).await.unwrap();

    assert_eq!(run.output.iterations_used, 2);
    assert_eq!(run.output.completion_status, CompletionStatus::CompletedMaxIterations);
    assert!(!run.output.findings.is_empty());
    assert!(run.output.average_quality <= 10.0);
    assert!(!run.output.research_topics_covered.is_empty());
}

#[test]
fn test_missing_research_output_is_repaired() {
    let retry = Arc::new(RetryExecutor::new(RetryPolicy::no_retry()));
    let transitioner = StateTransitioner::new().with_retry_stats(retry.clone());

    let (research, analysis_input) = transitioner
        .research_to_analysis(None, "Quantum Computing", "brief")
        .unwrap();

    assert!(research.repaired);
    assert_eq!(research.value.completion_status, CompletionStatus::CompletedWithRepairs);
    assert!(!analysis_input.findings.is_empty());
    assert_eq!(analysis_input.topic, "Quantum Computing");
    assert_eq!(retry.stats().total_repairs, 1);
}

#[tokio::test]
async fn test_stream_ends_with_single_terminal_snapshot() {
    let master = Arc::new(MasterWorkflow::new(toolkit(scripted_llm()), &config()));

    let events: Vec<_> = master
        .stream_pipeline("Quantum computing hardware roadmap", &CancellationToken::new())
        .collect()
        .await;

    assert_eq!(events[0].status, StreamStatus::Connected);
    let last = events.last().unwrap();
    assert_eq!(last.status, StreamStatus::Completed);
    assert_eq!(
        last.final_report.as_ref().unwrap().title,
        "Quantum Computing: State of the Field"
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let steps: Vec<u8> = events.iter().filter_map(|e| e.step).collect();
    assert!(steps.windows(2).all(|w| w[0] <= w[1]));
    assert!(steps.contains(&1) && steps.contains(&5));
    assert!(events.iter().any(|e| e.brief_preview.is_some()));
    assert_eq!(events.iter().filter(|e| e.supervisor_update.is_some()).count(), 2);
    assert!(events.iter().all(|e| e.research_id == last.research_id));
}

#[tokio::test]
async fn test_clarification_stream_is_terminal() {
    let master = Arc::new(MasterWorkflow::new(toolkit(scripted_llm()), &config()));

    let events: Vec<_> = master
        .stream_pipeline("AI", &CancellationToken::new())
        .collect()
        .await;

    let last = events.last().unwrap();
    assert!(last.is_terminal());
    assert!(last.clarification_question.is_some());
    assert!(last.final_report.is_none());
}

#[tokio::test]
async fn test_final_state_persisted_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()));
    let master = MasterWorkflow::new(toolkit(scripted_llm()), &config()).with_state_store(store.clone());

    let outcome = master
        .run_with_id("Quantum computing hardware roadmap", "qc-run", &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.report().is_some());

    let reloaded = FileStateStore::new(dir.path());
    let state = reloaded.get("qc-run").await.unwrap().unwrap();
    assert_eq!(state.status, ResearchStatus::Completed);
    assert_eq!(state.phase, PipelinePhase::Completed);
    assert_eq!(state.research_iterations, 2);
    assert!(!state.knowledge_base.is_empty());
    assert!(!state.evaluations.is_empty());
    assert_eq!(
        state.metadata_str(metadata_keys::REPORT_TITLE),
        Some("Quantum Computing: State of the Field")
    );
    assert!(state.metadata.contains_key(metadata_keys::RESEARCH_BRIEF));
    assert!(reloaded.list_ids().await.unwrap().contains(&"qc-run".to_string()));
}

#[tokio::test]
async fn test_finished_jobs_are_purged_after_ttl() {
    let ttl = Duration::from_millis(200);
    let jobs = Arc::new(MemoryJobStore::new(ttl));
    let master = Arc::new(
        MasterWorkflow::new(toolkit(scripted_llm()), &config()).with_job_store(jobs.clone()),
    );

    let id = master.submit("Quantum computing hardware roadmap").await.unwrap();

    let mut finished = None;
    for _ in 0..300 {
        let record = master.job(&id).await.unwrap();
        assert!(record.is_some(), "unfinished job must stay visible");
        if let Some(record) = record.filter(|r| r.status.is_terminal()) {
            finished = Some(record);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let finished = finished.expect("job never finished");
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished.finished_at.is_some());

    assert_eq!(master.purge_expired_jobs().await.unwrap(), 0);
    tokio::time::sleep(ttl + Duration::from_millis(50)).await;
    assert_eq!(master.purge_expired_jobs().await.unwrap(), 1);
    assert!(master.job(&id).await.unwrap().is_none());
    assert!(jobs.is_empty().await);
}
