//! Tool-calling research loop
//!
//! ```text
//! ┌──────────────┐  "enough" / cap / cancel
//! │   decide     │ ─────────────────────────▶ done (index new facts)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────────────────┐
//! │ web branch ║ vector      │  joined concurrently
//! │ search → scrape →        │
//! │ summarize → extract      │
//! └──────┬───────────────────┘
//!        ▼
//!  facts → knowledge base, notes → raw notes
//! ```
//!
//! Every tool call degrades on failure: the iteration continues with whatever the
//! other calls produced.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResearcherConfig;
use crate::llm::ModelRole;
use crate::research::{CompletionStatus, Fact, LogRole, ResearchPrompts, ResearchState};
use crate::text::{contains_word, truncate_chars, truncate_with_ellipsis};
use crate::tools::{ScrapedContent, SearchResult, ToolKit, VectorHit};

const STOP_WORDS: [&str; 3] = ["enough", "sufficient", "stop"];

pub const KNOWLEDGE_BASE_TAG: &str = "knowledge_base";

/// Whether a decision tells the loop to stop
pub fn is_stop_decision(decision: &str) -> bool {
    contains_word(decision, &STOP_WORDS)
}

/// Queries for one iteration: the topic, any "search for" terms, then broadening variants
pub fn derive_queries(topic: &str, decision: &str, max_queries: usize) -> Vec<String> {
    let mut candidates = vec![topic.to_string()];

    let lowered = decision.to_lowercase();
    if let Some(pos) = lowered.find("search for") {
        let rest = decision.get(pos + "search for".len()..).unwrap_or_default();
        let terms: Vec<&str> = rest
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .take(3)
            .collect();
        if !terms.is_empty() {
            candidates.push(format!("{} {}", topic, terms.join(" ")));
        }
    }

    if topic.chars().count() > 10 {
        candidates.push(format!("{} applications", topic));
        candidates.push(format!("{} benefits", topic));
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max_queries)
        .collect()
}

struct BranchYield {
    notes: Vec<String>,
    facts: Vec<Fact>,
}

pub struct ResearcherWorkflow {
    tools: Arc<ToolKit>,
    config: ResearcherConfig,
}

impl ResearcherWorkflow {
    pub fn new(tools: Arc<ToolKit>, config: ResearcherConfig) -> Self {
        Self { tools, config }
    }

    pub fn config(&self) -> &ResearcherConfig {
        &self.config
    }

    /// Drive the loop over `state` until the model stops it, the cap is hit or
    /// `cancel` fires
    pub async fn run(&self, mut state: ResearchState, cancel: &CancellationToken) -> ResearchState {
        let first_new_fact = state.knowledge_base.len();
        let mut completion = CompletionStatus::CompletedMaxIterations;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                info!(research_id = %state.research_id, iteration, "Research loop cancelled");
                completion = CompletionStatus::Cancelled;
                break;
            }

            let decision = self.decide(&state, iteration, cancel).await;
            state.log(LogRole::Brain, decision.clone());
            if is_stop_decision(&decision) {
                info!(research_id = %state.research_id, iteration, "Research loop finished by decision");
                completion = CompletionStatus::Completed;
                break;
            }

            let queries = derive_queries(&state.topic, &decision, self.config.max_queries_per_iteration);
            debug!(iteration, queries = ?queries, "Running tool step");

            let vector_query = queries.first().map(String::as_str).unwrap_or(&state.topic);
            let (web, vector) = tokio::join!(
                self.web_branch(&state.topic, &queries, cancel),
                self.vector_branch(vector_query, cancel),
            );

            for branch in [web, vector] {
                for note in branch.notes {
                    state.add_note(note);
                }
                for fact in branch.facts {
                    state.add_fact(fact);
                }
            }
            state.tool_call_iterations += 1;
            state.log(
                LogRole::Tools,
                format!("iteration {}: {} queries", iteration, queries.len()),
            );

            info!(
                research_id = %state.research_id,
                iteration,
                notes = state.raw_notes.len(),
                facts = state.knowledge_base.len(),
                "Research iteration complete"
            );
        }

        self.index_new_facts(&state.knowledge_base[first_new_fact..], cancel)
            .await;

        state.completion = completion;
        state.touch();
        state
    }

    async fn decide(&self, state: &ResearchState, iteration: usize, cancel: &CancellationToken) -> String {
        let (system, user) = ResearchPrompts::researcher_decision(&state.topic, &state.raw_notes, iteration);
        match self
            .tools
            .router()
            .invoke_text(ModelRole::Researcher, &system, &user, cancel)
            .await
        {
            Ok(decision) if !decision.trim().is_empty() => decision.trim().to_string(),
            Ok(_) => Self::fallback_decision(&state.topic),
            Err(e) => {
                warn!(error = %e, iteration, "Decision call failed, continuing with default search");
                Self::fallback_decision(&state.topic)
            }
        }
    }

    fn fallback_decision(topic: &str) -> String {
        format!("Search for more information about: {}", topic)
    }

    async fn web_branch(&self, topic: &str, queries: &[String], cancel: &CancellationToken) -> BranchYield {
        let per_query = join_all(
            queries
                .iter()
                .map(|query| self.research_query(topic, query, cancel)),
        )
        .await;

        let mut notes = Vec::new();
        let mut facts = Vec::new();
        for (note, query_facts) in per_query {
            notes.extend(note);
            facts.extend(query_facts);
        }
        BranchYield { notes, facts }
    }

    /// search → scrape → summarize → extract for one query
    async fn research_query(
        &self,
        topic: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> (Option<String>, Vec<Fact>) {
        let results = match self
            .tools
            .web_search(query, self.config.max_search_results, cancel)
            .await
        {
            Ok(results) => dedupe_by_url(results),
            Err(e) => {
                warn!(query, error = %e, "Web search failed");
                return (None, Vec::new());
            }
        };
        if results.is_empty() {
            debug!(query, "No search results");
            return (None, Vec::new());
        }

        let urls: Vec<String> = results.iter().map(|r| r.url.clone()).collect();
        let pages = match self.tools.scrape(&urls, cancel).await {
            Ok(pages) if !pages.is_empty() => pages,
            Ok(_) => pages_from_snippets(&results),
            Err(e) => {
                warn!(query, error = %e, "Scrape failed, using search snippets");
                pages_from_snippets(&results)
            }
        };

        let summaries = join_all(pages.iter().map(|page| self.summary_for(page, cancel))).await;

        let mut note = format!("Query: {}\n", query);
        for (i, (page, summary)) in pages.iter().zip(&summaries).enumerate() {
            note.push_str(&format!(
                "\nSOURCE {}: {}\nURL: {}\n{}\n",
                i + 1,
                page.title,
                page.url,
                summary
            ));
        }

        let content = summaries.join("\n\n");
        let facts = match self
            .tools
            .extract_facts(topic, &content, &pages[0].url, cancel)
            .await
        {
            Ok(facts) => facts,
            Err(e) => {
                warn!(query, error = %e, "Fact extraction failed");
                Vec::new()
            }
        };

        (Some(note), facts)
    }

    async fn summary_for(&self, page: &ScrapedContent, cancel: &CancellationToken) -> String {
        if let Some(summary) = page.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            return summary.to_string();
        }
        let max_chars = self.config.summary_max_chars;
        match self
            .tools
            .summarize(&page.title, &page.content, max_chars, cancel)
            .await
        {
            Ok(summary) if !summary.is_empty() => summary,
            Ok(_) => truncate_chars(&page.content, max_chars).to_string(),
            Err(e) => {
                debug!(url = %page.url, error = %e, "Summarize failed, truncating content");
                truncate_chars(&page.content, max_chars).to_string()
            }
        }
    }

    async fn vector_branch(&self, query: &str, cancel: &CancellationToken) -> BranchYield {
        let hits = match self
            .tools
            .vector_search(
                query,
                self.config.vector_top_k,
                self.config.vector_score_threshold,
                cancel,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "Vector search failed");
                Vec::new()
            }
        };

        BranchYield {
            notes: hits
                .iter()
                .map(|hit| {
                    truncate_with_ellipsis(
                        &format!(
                            "[Knowledge Base - Relevance: {:.0}%] {}",
                            hit.score * 100.0,
                            hit.content
                        ),
                        self.config.note_preview_chars,
                    )
                })
                .collect(),
            facts: hits.iter().map(fact_from_hit).collect(),
        }
    }

    async fn index_new_facts(&self, facts: &[Fact], cancel: &CancellationToken) {
        if !self.tools.can_index() {
            return;
        }
        let mut indexed = 0;
        for fact in facts.iter().filter(|f| !f.tags.contains(KNOWLEDGE_BASE_TAG)) {
            match self.tools.index_fact(fact, cancel).await {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                Err(e) => warn!(fact_id = %fact.id, error = %e, "Failed to index fact"),
            }
        }
        debug!(indexed, "Indexed new facts");
    }
}

fn dedupe_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

fn pages_from_snippets(results: &[SearchResult]) -> Vec<ScrapedContent> {
    results
        .iter()
        .map(|r| ScrapedContent {
            url: r.url.clone(),
            title: r.title.clone(),
            content: r.snippet.clone(),
            summary: Some(r.snippet.clone()),
        })
        .collect()
}

fn fact_from_hit(hit: &VectorHit) -> Fact {
    let source = hit
        .metadata
        .get("source")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", KNOWLEDGE_BASE_TAG, hit.id));
    Fact::new(hit.content.clone(), source, hit.score)
        .with_id(format!("kb-{}", hit.id))
        .with_tag(KNOWLEDGE_BASE_TAG)
}
