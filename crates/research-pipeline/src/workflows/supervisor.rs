//! Iterative supervision loop
//!
//! Each iteration runs five independently guarded sub-steps:
//!
//! 1. **brain**: pick the next research directive
//! 2. **tools**: one [`ResearcherWorkflow`] per topic, concurrently, merged into the
//!    supervisor's state; the draft is then re-rendered from the knowledge base
//! 3. **quality**: heuristic below the evaluator floor, LLM evaluator from then on
//! 4. **red team**: adversarial review of the draft, recorded as a critique
//! 5. **prune**: condense raw notes once they outgrow the size threshold
//!
//! The loop ends when quality reaches the threshold (red team and pruning are
//! skipped on that iteration) or after `max_iterations`. A failed sub-step is logged
//! and the iteration carries on with what it has.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::researcher::ResearcherWorkflow;
use crate::config::{ResearcherConfig, SupervisorConfig};
use crate::error::PipelineError;
use crate::llm::{prompt_pair, ModelRole, ModelRouter};
use crate::research::state::clamp_quality;
use crate::research::{
    metadata_keys, CompletionStatus, Critique, DimensionScore, DraftReport, EvaluationSource,
    Fact, LogRole, QualityEvaluation, ReportSection, ResearchPrompts, ResearchState,
};
use crate::resilience::RetryExecutor;
use crate::text::truncate_chars;
use crate::tools::ToolKit;

pub const BRAIN_FALLBACK: &str =
    "Continue research on key topics. Refine current draft based on gathered information.";

const HEURISTIC_CEILING: f64 = 9.0;
const HIGH_CONFIDENCE: f64 = 0.8;
const FACTS_PER_GROUP: usize = 15;
const CRITIQUE_SEVERITY: f64 = 0.8;
const PASS_MAX_CHARS: usize = 30;
const PRUNED_TAG: &str = "pruned";

/// Progress report for one supervision iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorUpdate {
    pub iteration: usize,
    pub max_iterations: usize,
    pub quality: f64,
    pub evaluation_source: EvaluationSource,
    pub fact_count: usize,
    pub new_facts: usize,
    pub topics: Vec<String>,
    #[serde(default)]
    pub critique: Option<String>,
    pub pruned: bool,
    /// Set on the iteration that ended the loop
    #[serde(default)]
    pub finished: Option<CompletionStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorOutcome {
    pub state: ResearchState,
    pub draft: DraftReport,
    pub iterations_used: usize,
    pub completion: CompletionStatus,
    pub final_quality: f64,
    /// Sub-steps that ended on a fallback value
    pub fallbacks_used: usize,
}

#[derive(Debug, Deserialize)]
struct EvaluatorVerdict {
    #[serde(default)]
    overall_score: f64,
    #[serde(default)]
    dimensions: Vec<DimensionScore>,
    #[serde(default)]
    summary: String,
}

/// Topics for one iteration: the brain's directive, the brief, then broadening variants
pub fn derive_topics(brain: &str, brief: &str, max_topics: usize) -> Vec<String> {
    let mut candidates = Vec::new();

    let directive = brain.lines().find_map(|line| {
        let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
        let lowered = trimmed.to_lowercase();
        ["research:", "investigate:"]
            .iter()
            .find(|prefix| lowered.starts_with(*prefix))
            .and_then(|prefix| trimmed.get(prefix.len()..))
            .map(str::trim)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    });
    candidates.extend(directive);

    let brief = brief.trim();
    if !brief.is_empty() {
        candidates.push(brief.to_string());
        if brief.chars().count() > 20 {
            candidates.push(format!("{} trends", brief));
            candidates.push(format!("{} applications", brief));
        }
    }

    dedupe_topics(candidates, max_topics)
}

fn dedupe_topics(topics: impl IntoIterator<Item = String>, max_topics: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    topics
        .into_iter()
        .filter(|t| !t.trim().is_empty() && seen.insert(t.to_lowercase()))
        .take(max_topics)
        .collect()
}

/// Cheap quality estimate on the 0..10 scale, capped at 9.0
pub fn heuristic_quality(state: &ResearchState, previous: Option<f64>) -> f64 {
    let facts = state.knowledge_base.len() as f64;
    let mut score = 5.0;
    score += (facts / 4.0).min(2.5);
    score += state.average_confidence() * 1.5;

    if !state.critiques.is_empty() {
        let addressed = state.critiques.iter().filter(|c| c.addressed).count() as f64;
        score += addressed / state.critiques.len() as f64 * 1.5;
    }

    if previous.is_some_and(|prev| score > prev) {
        score += 0.5;
    }

    score.clamp(0.0, HEURISTIC_CEILING)
}

/// Parse `[FACT] claim | source | confidence` lines; confidence may be 0..1 or 0..100
pub fn parse_pruned_facts(text: &str, max_facts: usize) -> Vec<Fact> {
    text.lines()
        .filter_map(|line| {
            let body = line.trim().trim_start_matches(['-', '*', ' ']);
            let body = body.strip_prefix("[FACT]")?.trim();
            let mut parts = body.split('|').map(str::trim);
            let claim = parts.next().filter(|c| !c.is_empty())?;
            let source = parts.next().filter(|s| !s.is_empty()).unwrap_or(PRUNED_TAG);
            let confidence = parts
                .next()
                .and_then(|c| c.trim_end_matches('%').parse::<f64>().ok())
                .map(|c| if c > 1.0 { c / 100.0 } else { c })
                .unwrap_or(0.5);
            Some(Fact::new(claim, source, confidence).with_tag(PRUNED_TAG))
        })
        .take(max_facts)
        .collect()
}

/// Deterministic draft text and sections from the brief and knowledge base
pub fn render_draft(state: &ResearchState) -> (String, Vec<ReportSection>) {
    let (high, standard): (Vec<&Fact>, Vec<&Fact>) = state
        .knowledge_base
        .iter()
        .partition(|f| f.confidence >= HIGH_CONFIDENCE);

    let bullets = |facts: &[&Fact]| {
        facts
            .iter()
            .take(FACTS_PER_GROUP)
            .map(|f| {
                if f.source_url.is_empty() {
                    format!("- {}", f.statement)
                } else {
                    format!("- {} ({})", f.statement, f.source_url)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut sections = Vec::new();
    if !high.is_empty() {
        sections.push(ReportSection::new("High Confidence Findings", bullets(&high)));
    }
    if !standard.is_empty() {
        sections.push(ReportSection::new("Standard Findings", bullets(&standard)));
    }

    let gaps: Vec<String> = state.open_critiques().map(|c| c.text.clone()).collect();
    if !gaps.is_empty() {
        let content = gaps
            .iter()
            .map(|g| format!("- {}", g))
            .collect::<Vec<_>>()
            .join("\n");
        let mut section = ReportSection::new("Identified Gaps", content);
        section.gaps = gaps;
        sections.push(section);
    }

    let mut text = format!("# Research Draft: {}\n\n{}\n", state.topic, state.research_brief);
    for section in &sections {
        text.push_str(&format!("\n## {}\n\n{}\n", section.heading, section.content));
    }
    (text, sections)
}

pub struct SupervisorWorkflow {
    tools: Arc<ToolKit>,
    researcher: ResearcherWorkflow,
    config: SupervisorConfig,
    retry: Arc<RetryExecutor>,
}

impl SupervisorWorkflow {
    pub fn new(
        tools: Arc<ToolKit>,
        researcher_config: ResearcherConfig,
        config: SupervisorConfig,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self {
            researcher: ResearcherWorkflow::new(tools.clone(), researcher_config),
            tools,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn router(&self) -> &ModelRouter {
        self.tools.router()
    }

    /// Step-wise session over `state`
    pub fn session(&self, state: ResearchState) -> SupervisorSession<'_> {
        self.session_with(state, self.config.clone())
    }

    /// Session with per-run limits
    pub fn session_with(&self, state: ResearchState, config: SupervisorConfig) -> SupervisorSession<'_> {
        SupervisorSession {
            workflow: self,
            config,
            state,
            iteration: 0,
            finished: None,
            fallbacks_used: 0,
            seed_topics: Vec::new(),
        }
    }

    /// Drive a session to completion
    pub async fn supervise(&self, state: ResearchState, cancel: &CancellationToken) -> SupervisorOutcome {
        let mut session = self.session(state);
        while session.step(cancel).await.is_some() {}
        session.into_outcome()
    }
}

pub struct SupervisorSession<'a> {
    workflow: &'a SupervisorWorkflow,
    config: SupervisorConfig,
    state: ResearchState,
    iteration: usize,
    finished: Option<CompletionStatus>,
    fallbacks_used: usize,
    seed_topics: Vec<String>,
}

impl<'a> SupervisorSession<'a> {
    /// Topics researched first, ahead of the brain's directive
    pub fn with_seed_topics(mut self, topics: Vec<String>) -> Self {
        self.seed_topics = topics;
        self
    }

    pub fn state(&self) -> &ResearchState {
        &self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn completion(&self) -> Option<CompletionStatus> {
        self.finished
    }

    fn finish(&mut self, status: CompletionStatus) {
        self.finished = Some(status);
        self.state.completion = status;
        self.state.touch();
    }

    /// Run one iteration; `None` once the loop has finished
    pub async fn step(&mut self, cancel: &CancellationToken) -> Option<SupervisorUpdate> {
        if self.finished.is_some() {
            return None;
        }
        if cancel.is_cancelled() {
            info!(research_id = %self.state.research_id, iteration = self.iteration, "Supervision cancelled");
            self.finish(CompletionStatus::Cancelled);
            return None;
        }

        self.iteration += 1;
        let iteration = self.iteration;
        self.state.research_iterations = iteration;
        info!(research_id = %self.state.research_id, iteration, "Supervisor iteration started");

        let directive = self.brain(cancel).await;
        let brief = self.brief().to_string();
        let mut topics = derive_topics(&directive, &brief, self.config.max_topics_per_iteration);
        if !self.seed_topics.is_empty() {
            let seeds = std::mem::take(&mut self.seed_topics);
            topics = dedupe_topics(seeds.into_iter().chain(topics), self.config.max_topics_per_iteration);
        }
        let new_facts = self.research_topics(&topics, cancel).await;

        let (quality, evaluation_source) = self.evaluate(cancel).await;

        let mut update = SupervisorUpdate {
            iteration,
            max_iterations: self.config.max_iterations,
            quality,
            evaluation_source,
            fact_count: self.state.knowledge_base.len(),
            new_facts,
            topics,
            critique: None,
            pruned: false,
            finished: None,
        };

        if quality >= self.config.min_quality_threshold {
            info!(iteration, quality, "Quality threshold reached");
            self.finish(CompletionStatus::CompletedQualityThreshold);
            update.finished = self.finished;
            return Some(update);
        }

        // No critique on the first pass
        if iteration > 1 {
            update.critique = self.red_team(cancel).await;
        }
        update.pruned = self.prune(cancel).await;

        if cancel.is_cancelled() {
            info!(research_id = %self.state.research_id, iteration, "Supervision cancelled");
            self.finish(CompletionStatus::Cancelled);
            update.finished = self.finished;
        } else if iteration >= self.config.max_iterations {
            info!(iteration, quality, "Iteration limit reached");
            self.finish(CompletionStatus::CompletedMaxIterations);
            update.finished = self.finished;
        }
        Some(update)
    }

    fn brief(&self) -> &str {
        if self.state.research_brief.trim().is_empty() {
            &self.state.topic
        } else {
            &self.state.research_brief
        }
    }

    async fn brain(&mut self, cancel: &CancellationToken) -> String {
        let (system, user) = ResearchPrompts::supervisor_brain(
            self.brief(),
            &self.state.draft_report,
            self.state.knowledge_base.len(),
            self.iteration,
        );
        let router = self.workflow.router();
        let outcome = self
            .workflow
            .retry
            .run_with_outcome(
                "supervisor:brain",
                cancel,
                || router.invoke_text(ModelRole::Brain, &system, &user, cancel),
                |_| Ok(BRAIN_FALLBACK.to_string()),
            )
            .await;

        let directive = match outcome {
            Ok(outcome) => {
                if outcome.used_fallback {
                    self.fallbacks_used += 1;
                }
                outcome.value
            }
            Err(e) => {
                warn!(error = %e, "Brain step failed");
                BRAIN_FALLBACK.to_string()
            }
        };
        self.state.log(LogRole::Brain, directive.clone());
        directive
    }

    /// Run one researcher per topic and merge the results; returns the number of new facts
    async fn research_topics(&mut self, topics: &[String], cancel: &CancellationToken) -> usize {
        let brief = self.brief().to_string();
        let runs = join_all(topics.iter().map(|topic| {
            let sub_state = ResearchState::new(topic.clone()).with_brief(brief.clone());
            self.workflow.researcher.run(sub_state, cancel)
        }))
        .await;

        let open_before: Vec<usize> = self
            .state
            .critiques
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.addressed)
            .map(|(i, _)| i)
            .collect();

        let mut new_facts = 0;
        for run in runs {
            for fact in run.knowledge_base {
                if self.state.add_fact(fact) {
                    new_facts += 1;
                }
            }
            for note in run.raw_notes {
                self.state.add_note(note);
            }
            self.state.tool_call_iterations += run.tool_call_iterations;
        }
        self.state.log(
            LogRole::Tools,
            format!("{} topics, {} new facts", topics.len(), new_facts),
        );

        if new_facts > 0 {
            for idx in open_before {
                self.state.critiques[idx].addressed = true;
            }
        }

        if !self.state.knowledge_base.is_empty() || self.state.draft_report.is_empty() {
            let (text, _) = render_draft(&self.state);
            self.state.draft_report = text;
        }
        debug!(iteration = self.iteration, new_facts, "Tools step complete");
        new_facts
    }

    async fn evaluate(&mut self, cancel: &CancellationToken) -> (f64, EvaluationSource) {
        let previous = self.state.latest_quality();
        let heuristic = heuristic_quality(&self.state, previous);

        let use_llm = self.iteration >= self.config.evaluator_floor
            && !self.state.knowledge_base.is_empty();

        let evaluation = if use_llm {
            let (system, user) = ResearchPrompts::quality_evaluation(
                self.brief(),
                &self.state.draft_report,
                self.state.knowledge_base.len(),
            );
            let messages = prompt_pair(system, user);
            let messages = &messages;
            let router = self.workflow.router();
            let iteration = self.iteration;
            let heuristic_eval = QualityEvaluation::new(heuristic, EvaluationSource::Heuristic, iteration)
                .with_summary("LLM evaluation unavailable; heuristic estimate");

            let outcome = self
                .workflow
                .retry
                .run_with_outcome(
                    "supervisor:quality",
                    cancel,
                    || async move {
                        let verdict: EvaluatorVerdict = router
                            .invoke_structured(ModelRole::Evaluator, messages, cancel)
                            .await?;
                        Ok(QualityEvaluation::new(
                            clamp_quality(verdict.overall_score),
                            EvaluationSource::Llm,
                            iteration,
                        )
                        .with_dimensions(verdict.dimensions)
                        .with_summary(verdict.summary))
                    },
                    |_| Ok(heuristic_eval.clone()),
                )
                .await;

            match outcome {
                Ok(outcome) => {
                    if outcome.used_fallback {
                        self.fallbacks_used += 1;
                    }
                    outcome.value
                }
                Err(e) => {
                    warn!(error = %e, "Quality evaluation failed");
                    heuristic_eval
                }
            }
        } else {
            QualityEvaluation::new(heuristic, EvaluationSource::Heuristic, self.iteration)
        };

        let quality = evaluation.overall_score;
        let source = evaluation.source;
        info!(
            research_id = %self.state.research_id,
            iteration = self.iteration,
            quality,
            source = ?source,
            "Quality evaluated"
        );
        self.state.evaluations.push(evaluation);
        self.state.set_metadata(metadata_keys::QUALITY_SCORE, quality);
        (quality, source)
    }

    async fn red_team(&mut self, cancel: &CancellationToken) -> Option<String> {
        let draft = truncate_chars(&self.state.draft_report, self.config.red_team_draft_chars).to_string();
        let (system, user) = ResearchPrompts::red_team(&draft);
        let router = self.workflow.router();

        let outcome = self
            .workflow
            .retry
            .run_with_outcome(
                "supervisor:red_team",
                cancel,
                || router.invoke_text(ModelRole::RedTeam, &system, &user, cancel),
                |_| Ok(String::new()),
            )
            .await;

        let reply = match outcome {
            Ok(outcome) => {
                if outcome.used_fallback {
                    self.fallbacks_used += 1;
                }
                outcome.value
            }
            Err(e) => {
                warn!(error = %e, "Red team step failed");
                String::new()
            }
        };

        let reply = reply.trim();
        let passed = reply.contains("PASS") && reply.chars().count() < PASS_MAX_CHARS;
        if reply.is_empty() || passed {
            debug!(iteration = self.iteration, "Red team found nothing material");
            return None;
        }

        self.state.critiques.push(Critique {
            iteration: self.iteration,
            text: reply.to_string(),
            severity: CRITIQUE_SEVERITY,
            addressed: false,
        });
        self.state.touch();
        Some(reply.to_string())
    }

    async fn prune(&mut self, cancel: &CancellationToken) -> bool {
        if self.state.raw_notes_len() <= self.config.prune_threshold_chars {
            return false;
        }

        let notes = self.state.raw_notes.join("\n\n");
        let (system, user) = ResearchPrompts::prune_context(&notes, self.config.max_pruned_facts);
        let router = self.workflow.router();

        let outcome: Result<_, PipelineError> = self
            .workflow
            .retry
            .run_with_outcome(
                "supervisor:prune",
                cancel,
                || router.invoke_text(ModelRole::Pruner, &system, &user, cancel),
                |_| Ok(String::new()),
            )
            .await;

        let condensed = match outcome {
            Ok(outcome) => {
                if outcome.used_fallback {
                    self.fallbacks_used += 1;
                }
                outcome.value
            }
            Err(e) => {
                warn!(error = %e, "Context pruning failed");
                String::new()
            }
        };
        if condensed.trim().is_empty() {
            return false;
        }

        let mut injected = 0;
        for fact in parse_pruned_facts(&condensed, self.config.max_pruned_facts) {
            if self.state.add_fact_dedup(fact) {
                injected += 1;
            }
        }

        let before = self.state.raw_notes.len();
        self.state.raw_notes = vec![condensed.trim().to_string()];
        self.state.touch();
        info!(iteration = self.iteration, notes_before = before, injected, "Context pruned");
        true
    }

    pub fn into_outcome(self) -> SupervisorOutcome {
        let final_quality = self.state.latest_quality().unwrap_or(0.0);
        let completion = self.finished.unwrap_or(CompletionStatus::CompletedMaxIterations);
        let (_, sections) = render_draft(&self.state);
        let draft = DraftReport {
            brief: self.state.research_brief.clone(),
            text: self.state.draft_report.clone(),
            sections,
            quality_score: final_quality,
            created_at: Utc::now(),
        };
        SupervisorOutcome {
            iterations_used: self.iteration,
            completion,
            final_quality,
            fallbacks_used: self.fallbacks_used,
            draft,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitRegistry, DependencyGuard, RetryPolicy};
    use crate::testing::{ScriptedProvider, StaticScraper, StaticSearch};
    use std::time::Duration;

    const FACTS: &str = r#"{"facts": [
        {"statement": "Qubits can be entangled", "confidence": 0.9, "source": "https://a.example", "category": "physics"},
        {"statement": "Decoherence limits circuit depth", "confidence": 0.6, "source": "https://a.example", "category": "physics"}
    ]}"#;

    fn scripted() -> ScriptedProvider {
        ScriptedProvider::new("ok")
            .with_rule("direct a research loop", "enough")
            .with_rule("Extract verifiable facts", FACTS)
            .with_rule("adversarial reviewer", "PASS")
    }

    fn workflow(provider: ScriptedProvider, config: SupervisorConfig) -> SupervisorWorkflow {
        workflow_with(Arc::new(provider), config)
    }

    fn workflow_with(provider: Arc<ScriptedProvider>, config: SupervisorConfig) -> SupervisorWorkflow {
        let registry = CircuitRegistry::new(CircuitBreakerConfig::default());
        let router = Arc::new(ModelRouter::new(
            provider,
            DependencyGuard::from_registry("llm", &registry, 8),
        ));
        let tools = Arc::new(ToolKit::new(
            router,
            Arc::new(StaticSearch::with_urls(&["https://a.example"])),
            Arc::new(StaticScraper::with_summaries()),
            &registry,
            8,
        ));
        let retry = Arc::new(RetryExecutor::new(
            RetryPolicy::new(1).with_fixed_delay(Duration::from_millis(1)),
        ));
        let researcher = ResearcherConfig::default()
            .with_max_iterations(1)
            .with_max_queries(1);
        SupervisorWorkflow::new(tools, researcher, config, retry)
    }

    fn researching_provider() -> ScriptedProvider {
        ScriptedProvider::new("ok")
            .with_rule("direct a research loop", "search for more")
            .with_rule("Extract verifiable facts", FACTS)
            .with_rule("adversarial reviewer", "PASS")
    }

    #[test]
    fn test_derive_topics() {
        let topics = derive_topics(
            "Thinking...\nresearch: error correction thresholds\ninvestigate: other",
            "Quantum computing in 2025",
            3,
        );
        assert_eq!(
            topics,
            vec![
                "error correction thresholds",
                "Quantum computing in 2025",
                "Quantum computing in 2025 trends",
            ]
        );

        assert_eq!(derive_topics(BRAIN_FALLBACK, "Rust", 3), vec!["Rust"]);
    }

    #[test]
    fn test_heuristic_quality_bounds() {
        let mut state = ResearchState::new("t");
        assert_eq!(heuristic_quality(&state, None), 5.0);

        for i in 0..20 {
            state.add_fact(Fact::new(format!("fact {i}"), "s", 1.0));
        }
        state.critiques.push(Critique {
            iteration: 1,
            text: "gap".into(),
            severity: 0.8,
            addressed: true,
        });
        // 5 + 2.5 + 1.5 + 1.5 + 0.5 = 11 before the ceiling
        assert_eq!(heuristic_quality(&state, Some(1.0)), HEURISTIC_CEILING);
    }

    #[test]
    fn test_parse_pruned_facts() {
        let text = "Key facts:\n[FACT] Qubits decohere | https://a.example | 85\n\
                    - [FACT] Error rates fall | https://b.example | 0.7\n\
                    [FACT]  | missing claim | 0.9\n[FACT] Bare claim";
        let facts = parse_pruned_facts(text, 10);
        assert_eq!(facts.len(), 3);
        assert!((facts[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(facts[1].source_url, "https://b.example");
        assert_eq!(facts[2].confidence, 0.5);
        assert!(facts[2].tags.contains(PRUNED_TAG));

        assert_eq!(parse_pruned_facts(text, 1).len(), 1);
    }

    #[test]
    fn test_render_draft_groups_facts() {
        let mut state = ResearchState::new("Qubits").with_brief("Qubit basics");
        state.add_fact(Fact::new("High", "https://a", 0.9));
        state.add_fact(Fact::new("Low", "", 0.4));
        state.critiques.push(Critique {
            iteration: 1,
            text: "No error-rate numbers".into(),
            severity: 0.8,
            addressed: false,
        });

        let (text, sections) = render_draft(&state);
        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["High Confidence Findings", "Standard Findings", "Identified Gaps"]);
        assert!(text.contains("- High (https://a)"));
        assert!(text.contains("- Low\n"));
        assert_eq!(sections[2].gaps, vec!["No error-rate numbers"]);
    }

    #[tokio::test]
    async fn test_unreachable_threshold_runs_max_iterations() {
        let workflow = workflow(
            scripted(),
            SupervisorConfig::default().with_max_iterations(2).with_min_quality(10.0),
        );
        let state = ResearchState::new("Quantum Computing").with_brief("Quantum Computing");

        let outcome = workflow.supervise(state, &CancellationToken::new()).await;

        assert_eq!(outcome.iterations_used, 2);
        assert_eq!(outcome.completion, CompletionStatus::CompletedMaxIterations);
        assert_eq!(outcome.state.evaluations.len(), 2);
        assert!(outcome.state.evaluations.iter().all(|e| e.source == EvaluationSource::Heuristic));
    }

    #[tokio::test]
    async fn test_threshold_reached_stops_early() {
        let provider = researching_provider()
            .with_rule("grade research drafts", r#"{"overall_score": 9.5, "summary": "thorough"}"#);
        let workflow = workflow(
            provider,
            SupervisorConfig::default()
                .with_max_iterations(5)
                .with_min_quality(9.0)
                .with_evaluator_floor(1),
        );

        let outcome = workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.completion, CompletionStatus::CompletedQualityThreshold);
        assert_eq!(outcome.final_quality, 9.5);
        assert_eq!(outcome.state.latest_evaluation().unwrap().source, EvaluationSource::Llm);
        assert!(outcome.state.critiques.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_evaluation_falls_back_to_heuristic() {
        let provider = researching_provider().with_rule("grade research drafts", "not json at all");
        let workflow = workflow(
            provider,
            SupervisorConfig::default()
                .with_max_iterations(1)
                .with_evaluator_floor(1),
        );

        let outcome = workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;

        let evaluation = outcome.state.latest_evaluation().unwrap();
        assert_eq!(evaluation.source, EvaluationSource::Heuristic);
        assert!(evaluation.overall_score <= HEURISTIC_CEILING);
        assert_eq!(outcome.fallbacks_used, 1);
    }

    #[tokio::test]
    async fn test_red_team_critique_recorded_then_addressed() {
        let provider = researching_provider()
            .with_rule("adversarial reviewer", "The draft cites no benchmark data for its speedup claims.");
        let workflow = workflow(
            provider,
            SupervisorConfig::default().with_max_iterations(3).with_min_quality(10.0),
        );
        let cancel = CancellationToken::new();
        let mut session = workflow.session(ResearchState::new("Rust").with_brief("Rust"));

        let first = session.step(&cancel).await.unwrap();
        assert!(first.critique.is_none());

        let second = session.step(&cancel).await.unwrap();
        assert!(second.critique.is_some());
        assert_eq!(session.state().open_critiques().count(), 1);
        assert_eq!(session.state().critiques[0].iteration, 2);

        let third = session.step(&cancel).await.unwrap();
        assert_eq!(third.finished, Some(CompletionStatus::CompletedMaxIterations));
        assert!(third.new_facts > 0);
        assert!(session.state().critiques[0].addressed);
        assert!(session.step(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_red_team_skipped_on_first_iteration() {
        let provider = Arc::new(researching_provider());
        let workflow = workflow_with(
            provider.clone(),
            SupervisorConfig::default().with_max_iterations(1).with_min_quality(10.0),
        );
        workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;
        assert_eq!(provider.calls_matching("adversarial reviewer"), 0);

        let provider = Arc::new(researching_provider());
        let workflow = workflow_with(
            provider.clone(),
            SupervisorConfig::default().with_max_iterations(2).with_min_quality(10.0),
        );
        workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;
        assert_eq!(provider.calls_matching("adversarial reviewer"), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_last_iteration_reports_cancelled() {
        let workflow = workflow(
            researching_provider().with_delay(Duration::from_millis(30)),
            SupervisorConfig::default().with_max_iterations(2).with_min_quality(10.0),
        );
        let mut session = workflow.session(ResearchState::new("Rust").with_brief("Rust"));
        let first = session.step(&CancellationToken::new()).await.unwrap();
        assert!(first.finished.is_none());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let last = session.step(&cancel).await.unwrap();
        assert_eq!(last.finished, Some(CompletionStatus::Cancelled));
        assert_eq!(session.into_outcome().completion, CompletionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_pruning_condenses_notes() {
        let provider = researching_provider()
            .with_rule("Condense research notes", "[FACT] Condensed claim | https://c.example | 0.9");
        let workflow = workflow(
            provider,
            SupervisorConfig::default()
                .with_max_iterations(1)
                .with_min_quality(10.0)
                .with_prune_threshold(10),
        );

        let outcome = workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.raw_notes.len(), 1);
        assert!(outcome.state.raw_notes[0].starts_with("[FACT] Condensed claim"));
        assert!(outcome
            .state
            .knowledge_base
            .iter()
            .any(|f| f.statement == "Condensed claim"));
    }

    #[tokio::test]
    async fn test_brain_failure_uses_fallback_directive() {
        let provider = scripted().with_failure("supervise an iterative research", "model offline");
        let workflow = workflow(
            provider,
            SupervisorConfig::default().with_max_iterations(1).with_min_quality(10.0),
        );

        let outcome = workflow
            .supervise(ResearchState::new("Rust").with_brief("Rust"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state.logs.brain[0], BRAIN_FALLBACK);
        assert_eq!(outcome.fallbacks_used, 1);
        assert_eq!(outcome.iterations_used, 1);
    }

    #[tokio::test]
    async fn test_cancelled_session_reports_cancelled() {
        let workflow = workflow(scripted(), SupervisorConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = workflow.supervise(ResearchState::new("Rust"), &cancel).await;

        assert_eq!(outcome.completion, CompletionStatus::Cancelled);
        assert_eq!(outcome.iterations_used, 0);
    }
}
