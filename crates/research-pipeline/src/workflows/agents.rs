//! Research, analysis and report agents
//!
//! Each agent turns one typed input into one typed output. Sub-steps degrade on their
//! own: a failed LLM call is logged, replaced with a neutral value and counted in
//! [`AgentRun::fallbacks_used`]. Only cancellation and fatal errors escape.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::supervisor::{SupervisorOutcome, SupervisorWorkflow};
use crate::error::PipelineError;
use crate::llm::{prompt_pair, ModelRole, ModelRouter};
use crate::research::state::{clamp_quality, clamp_unit};
use crate::research::{
    AnalysisInput, AnalysisOutput, Citation, CompletionStatus, Contradiction, ExtractedFact,
    FactExtractionResult, KeyInsight, ReportInput, ReportOutput, ResearchInput, ResearchOutput,
    ResearchPrompts, ResearchState,
};
use crate::validation::ERROR_RECOVERY;

const MAX_PLANNED_TOPICS: usize = 4;
const MAX_ANALYZED_FACTS: usize = 15;
const MAX_INSIGHTS: usize = 5;
const GENERAL_CATEGORY: &str = "general";

/// Agent output plus the number of sub-steps that fell back
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRun<T> {
    pub output: T,
    pub fallbacks_used: usize,
}

impl<T> AgentRun<T> {
    pub fn degraded(&self) -> bool {
        self.fallbacks_used > 0
    }
}

/// Log and swallow a sub-step failure; cancellation and fatal errors propagate
fn degrade<T>(
    step: &str,
    result: Result<T, PipelineError>,
    fallback: impl FnOnce() -> T,
    fallbacks: &mut usize,
) -> Result<T, PipelineError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_cancelled() || e.is_fatal() => Err(e),
        Err(e) => {
            warn!(step, error = %e, "Agent sub-step degraded");
            *fallbacks += 1;
            Ok(fallback())
        }
    }
}

/// Group the knowledge base by category into findings
pub fn findings_from_state(state: &ResearchState) -> Vec<FactExtractionResult> {
    let mut groups: BTreeMap<String, Vec<ExtractedFact>> = BTreeMap::new();
    for fact in &state.knowledge_base {
        let mut extracted = ExtractedFact::from(fact);
        if extracted.category.is_empty() {
            extracted.category = GENERAL_CATEGORY.to_string();
        }
        groups.entry(extracted.category.clone()).or_default().push(extracted);
    }
    groups.into_values().map(FactExtractionResult::new).collect()
}

/// [`ResearchOutput`] view of a finished supervision run
pub fn research_output(outcome: &SupervisorOutcome, topics: &[String]) -> ResearchOutput {
    let mut covered: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for topic in topics.iter().chain(std::iter::once(&outcome.state.topic)) {
        if seen.insert(topic.to_lowercase()) {
            covered.push(topic.clone());
        }
    }

    ResearchOutput {
        findings: findings_from_state(&outcome.state),
        average_quality: clamp_quality(outcome.final_quality),
        iterations_used: outcome.iterations_used,
        research_topics_covered: covered,
        completion_status: outcome.completion,
    }
}

/// Supervisor-backed research agent
pub struct ResearcherAgent {
    supervisor: Arc<SupervisorWorkflow>,
    router: Arc<ModelRouter>,
}

/// Result of [`ResearcherAgent::research`]
#[derive(Debug, Clone)]
pub struct ResearchRun {
    pub output: ResearchOutput,
    pub outcome: SupervisorOutcome,
    pub fallbacks_used: usize,
}

impl ResearcherAgent {
    pub fn new(supervisor: Arc<SupervisorWorkflow>, router: Arc<ModelRouter>) -> Self {
        Self { supervisor, router }
    }

    /// 2-4 sub-topics from the LLM, or just the topic itself
    pub async fn plan_topics(
        &self,
        input: &ResearchInput,
        cancel: &CancellationToken,
        fallbacks: &mut usize,
    ) -> Result<Vec<String>, PipelineError> {
        let (system, user) = ResearchPrompts::plan_topics(&input.topic, &input.research_brief);
        let planned = self
            .router
            .invoke_structured::<Vec<String>>(ModelRole::Researcher, &prompt_pair(system, user), cancel)
            .await;
        let mut topics = degrade("plan_topics", planned, Vec::new, fallbacks)?;

        topics.retain(|t| !t.trim().is_empty());
        topics.truncate(MAX_PLANNED_TOPICS);
        if topics.is_empty() {
            topics.push(input.topic.clone());
        }
        Ok(topics)
    }

    pub async fn run(
        &self,
        input: &ResearchInput,
        cancel: &CancellationToken,
    ) -> Result<AgentRun<ResearchOutput>, PipelineError> {
        let state = ResearchState::new(input.topic.clone()).with_brief(input.research_brief.clone());
        let run = self.research(input, state, cancel).await?;
        Ok(AgentRun {
            output: run.output,
            fallbacks_used: run.fallbacks_used,
        })
    }

    /// Supervise `state` with the input's limits; cancellation is an error here
    pub async fn research(
        &self,
        input: &ResearchInput,
        state: ResearchState,
        cancel: &CancellationToken,
    ) -> Result<ResearchRun, PipelineError> {
        let mut fallbacks = 0;
        let topics = self.plan_topics(input, cancel, &mut fallbacks).await?;

        let config = self
            .supervisor
            .config()
            .clone()
            .with_max_iterations(input.max_iterations)
            .with_min_quality(input.min_quality_threshold);
        let mut session = self
            .supervisor
            .session_with(state, config)
            .with_seed_topics(topics.clone());

        let mut covered = topics;
        while let Some(update) = session.step(cancel).await {
            covered.extend(update.topics);
        }
        let outcome = session.into_outcome();
        if outcome.completion == CompletionStatus::Cancelled {
            return Err(PipelineError::Cancelled);
        }

        let output = research_output(&outcome, &covered);
        info!(
            topic = %input.topic,
            facts = output.fact_count(),
            quality = output.average_quality,
            iterations = output.iterations_used,
            "Research agent finished"
        );
        Ok(ResearchRun {
            output,
            fallbacks_used: fallbacks + outcome.fallbacks_used,
            outcome,
        })
    }
}

/// Themes, contradictions, ranked insights and a narrative over research findings
pub struct AnalystAgent {
    router: Arc<ModelRouter>,
}

impl AnalystAgent {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    async fn structured<T: serde::de::DeserializeOwned>(
        &self,
        prompts: (String, String),
        cancel: &CancellationToken,
    ) -> Result<T, PipelineError> {
        let (system, user) = prompts;
        self.router
            .invoke_structured(ModelRole::Analyst, &prompt_pair(system, user), cancel)
            .await
    }

    pub async fn run(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<AgentRun<AnalysisOutput>, PipelineError> {
        let mut fallbacks = 0;
        let facts: Vec<&ExtractedFact> = input
            .findings
            .iter()
            .flat_map(|f| f.facts.iter())
            .filter(|f| !f.statement.trim().is_empty())
            .take(MAX_ANALYZED_FACTS)
            .collect();
        let statements: Vec<String> = facts.iter().map(|f| f.statement.clone()).collect();

        let themes = self
            .structured::<Vec<String>>(ResearchPrompts::themes(&input.topic, &statements), cancel)
            .await;
        let mut themes = degrade("themes", themes, Vec::new, &mut fallbacks)?;
        themes.retain(|t| !t.trim().is_empty());

        let contradictions = if statements.len() < 2 {
            Vec::new()
        } else {
            let found = self
                .structured::<Vec<Contradiction>>(ResearchPrompts::contradictions(&statements), cancel)
                .await;
            degrade("contradictions", found, Vec::new, &mut fallbacks)?
                .into_iter()
                .map(|mut c| {
                    c.severity = clamp_unit(c.severity);
                    c
                })
                .collect()
        };

        let scores = self
            .structured::<Vec<f64>>(ResearchPrompts::importance(&input.topic, &statements), cancel)
            .await;
        let scores = degrade(
            "importance",
            scores,
            || facts.iter().map(|f| f.confidence).collect(),
            &mut fallbacks,
        )?;
        let key_insights = rank_insights(&input.topic, &facts, &scores);

        let insight_lines: Vec<String> = key_insights
            .iter()
            .map(|i| format!("- {}", i.statement))
            .collect();
        let (system, user) =
            ResearchPrompts::narrative(&input.topic, &input.research_brief, &insight_lines, &themes);
        let narrative = self
            .router
            .invoke_text(ModelRole::Analyst, &system, &user, cancel)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(PipelineError::malformed("narrative", "empty response"))
                } else {
                    Ok(text.trim().to_string())
                }
            });
        let synthesis_narrative = degrade(
            "narrative",
            narrative,
            || {
                format!(
                    "Key findings on {}:\n{}",
                    input.topic,
                    insight_lines.join("\n")
                )
            },
            &mut fallbacks,
        )?;

        let confidence_score = confidence_score(&key_insights, themes.len(), contradictions.len());
        info!(
            topic = %input.topic,
            themes = themes.len(),
            insights = key_insights.len(),
            contradictions = contradictions.len(),
            confidence = confidence_score,
            "Analysis complete"
        );

        Ok(AgentRun {
            output: AnalysisOutput {
                synthesis_narrative,
                key_insights,
                contradictions,
                confidence_score,
                themes_identified: themes,
                completion_status: if fallbacks > 0 {
                    CompletionStatus::CompletedWithErrors
                } else {
                    CompletionStatus::Completed
                },
            },
            fallbacks_used: fallbacks,
        })
    }
}

/// Top facts by importance; missing scores fall back to the fact's confidence
pub fn rank_insights(topic: &str, facts: &[&ExtractedFact], scores: &[f64]) -> Vec<KeyInsight> {
    let mut scored: Vec<(f64, &ExtractedFact)> = facts
        .iter()
        .enumerate()
        .map(|(i, fact)| {
            let score = scores.get(i).copied().unwrap_or(fact.confidence);
            (clamp_unit(score), *fact)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .take(MAX_INSIGHTS)
        .map(|(importance, fact)| KeyInsight {
            statement: fact.statement.clone(),
            importance,
            source_facts: vec![fact.source.clone()],
            supporting_evidence: vec![format!("Finding supports research topic: {}", topic)],
        })
        .collect()
}

/// 60% mean importance, 40% theme diversity, minus up to 0.3 for contradictions
pub fn confidence_score(insights: &[KeyInsight], themes: usize, contradictions: usize) -> f64 {
    let base = if insights.is_empty() {
        0.5
    } else {
        insights.iter().map(|i| i.importance).sum::<f64>() / insights.len() as f64
    };
    let theme_factor = (themes as f64 / 5.0).min(1.0);
    let penalty = (contradictions as f64 * 0.1).min(0.3);
    clamp_unit(base * 0.6 + theme_factor * 0.4 - penalty)
}

/// Final report writer
pub struct ReportAgent {
    router: Arc<ModelRouter>,
}

impl ReportAgent {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    /// One structured call; an LLM failure is returned for the caller's retry and fallback
    pub async fn run(
        &self,
        input: &ReportInput,
        cancel: &CancellationToken,
    ) -> Result<AgentRun<ReportOutput>, PipelineError> {
        let (system, user) =
            ResearchPrompts::report(&input.topic, &input.author, &input.research, &input.analysis);
        let mut report: ReportOutput = self
            .router
            .invoke_structured(ModelRole::Report, &prompt_pair(system, user), cancel)
            .await?;

        report.citations = citations(&input.research);
        report.quality_score = report_quality(&input.research, &input.analysis);
        report.created_at = Some(Utc::now());
        let upstream_degraded = [input.research.completion_status, input.analysis.completion_status]
            .contains(&CompletionStatus::CompletedWithErrors);
        report.completion_status = if upstream_degraded {
            CompletionStatus::CompletedWithErrors
        } else {
            CompletionStatus::Completed
        };

        info!(
            title = %report.title,
            sections = report.sections.len(),
            citations = report.citations.len(),
            quality = report.quality_score,
            "Report generated"
        );
        Ok(AgentRun {
            output: report,
            fallbacks_used: 0,
        })
    }
}

/// Numbered citations for distinct fact sources, in first-seen order
pub fn citations(research: &ResearchOutput) -> Vec<Citation> {
    let mut seen = HashSet::new();
    research
        .all_facts()
        .map(|f| f.source.trim())
        .filter(|s| !s.is_empty() && *s != ERROR_RECOVERY && seen.insert(s.to_string()))
        .enumerate()
        .map(|(i, source)| Citation {
            index: i + 1,
            source: source.to_string(),
            url: source.starts_with("http").then(|| source.to_string()),
            accessed_at: Utc::now(),
        })
        .collect()
}

/// Mean of research quality and analysis confidence, both on the 0..10 scale
pub fn report_quality(research: &ResearchOutput, analysis: &AnalysisOutput) -> f64 {
    clamp_quality((research.average_quality + analysis.confidence_score * 10.0) / 2.0)
}
