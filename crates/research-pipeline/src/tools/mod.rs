//! Research tools
//!
//! External collaborators sit behind the [`SearchClient`], [`Scraper`],
//! [`VectorStore`] and [`Embedder`] traits. The set of tools the research loop may
//! call is closed ([`ResearchTool`]); [`ToolKit`] dispatches each [`ToolCall`] to
//! its implementation through a per-tool [`DependencyGuard`].

mod memory_vector;
mod scraper;
mod tavily;

pub use memory_vector::{HashingEmbedder, MemoryVectorStore};
pub use scraper::HttpScraper;
pub use tavily::{SearchDepth, TavilyError, TavilySearchClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::{prompt_pair, ModelRole, ModelRouter};
use crate::research::{Fact, FactExtractionResult, ResearchPrompts};
use crate::resilience::{CircuitRegistry, DependencyGuard};
use crate::text::truncate_chars;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Relevance 0..1 when the engine reports one
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub content: String,
    /// Similarity 0..1
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        engines: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, PipelineError>;
}

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Fetch each URL; unreachable pages are left out of the result
    async fn scrape_and_summarize(&self, urls: &[String]) -> Result<Vec<ScrapedContent>, PipelineError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>, PipelineError>;

    async fn upsert(
        &self,
        id: &str,
        content: &str,
        embedding: &[f32],
        metadata: Option<serde_json::Value>,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Every capability the research loop can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchTool {
    WebSearch,
    Scrape,
    Summarize,
    VectorSearch,
    ExtractFacts,
}

impl ResearchTool {
    pub const ALL: [ResearchTool; 5] = [
        ResearchTool::WebSearch,
        ResearchTool::Scrape,
        ResearchTool::Summarize,
        ResearchTool::VectorSearch,
        ResearchTool::ExtractFacts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::Scrape => "scrape",
            Self::Summarize => "summarize",
            Self::VectorSearch => "vector_search",
            Self::ExtractFacts => "extract_facts",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    WebSearch { query: String, max_results: usize },
    Scrape { urls: Vec<String> },
    Summarize { title: String, content: String, max_chars: usize },
    VectorSearch { query: String, top_k: usize, threshold: f64 },
    ExtractFacts { topic: String, content: String, source: String },
}

impl ToolCall {
    pub fn tool(&self) -> ResearchTool {
        match self {
            Self::WebSearch { .. } => ResearchTool::WebSearch,
            Self::Scrape { .. } => ResearchTool::Scrape,
            Self::Summarize { .. } => ResearchTool::Summarize,
            Self::VectorSearch { .. } => ResearchTool::VectorSearch,
            Self::ExtractFacts { .. } => ResearchTool::ExtractFacts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    SearchResults(Vec<SearchResult>),
    Pages(Vec<ScrapedContent>),
    Summary(String),
    VectorHits(Vec<VectorHit>),
    Facts(Vec<Fact>),
}

/// Guarded access to the research tools
pub struct ToolKit {
    router: Arc<ModelRouter>,
    search: Arc<dyn SearchClient>,
    scraper: Arc<dyn Scraper>,
    vector: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    guards: HashMap<ResearchTool, DependencyGuard>,
    engines: Option<Vec<String>>,
}

impl ToolKit {
    pub fn new(
        router: Arc<ModelRouter>,
        search: Arc<dyn SearchClient>,
        scraper: Arc<dyn Scraper>,
        registry: &CircuitRegistry,
        max_concurrent: usize,
    ) -> Self {
        let guards = ResearchTool::ALL
            .iter()
            .map(|tool| {
                (
                    *tool,
                    DependencyGuard::from_registry(tool.name(), registry, max_concurrent),
                )
            })
            .collect();

        Self {
            router,
            search,
            scraper,
            vector: None,
            embedder: None,
            guards,
            engines: None,
        }
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector = Some(store);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Restrict web search to the given engines, when the client supports it
    pub fn with_engines(mut self, engines: Vec<String>) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn has_vector_store(&self) -> bool {
        self.vector.is_some()
    }

    pub fn can_index(&self) -> bool {
        self.vector.is_some() && self.embedder.is_some()
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// Dispatch a call to its tool
    pub async fn invoke(
        &self,
        call: ToolCall,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, PipelineError> {
        debug!(tool = call.tool().name(), "Invoking tool");
        match call {
            ToolCall::WebSearch { query, max_results } => self
                .web_search(&query, max_results, cancel)
                .await
                .map(ToolOutput::SearchResults),
            ToolCall::Scrape { urls } => self.scrape(&urls, cancel).await.map(ToolOutput::Pages),
            ToolCall::Summarize {
                title,
                content,
                max_chars,
            } => self
                .summarize(&title, &content, max_chars, cancel)
                .await
                .map(ToolOutput::Summary),
            ToolCall::VectorSearch {
                query,
                top_k,
                threshold,
            } => self
                .vector_search(&query, top_k, threshold, cancel)
                .await
                .map(ToolOutput::VectorHits),
            ToolCall::ExtractFacts {
                topic,
                content,
                source,
            } => self
                .extract_facts(&topic, &content, &source, cancel)
                .await
                .map(ToolOutput::Facts),
        }
    }

    fn guard(&self, tool: ResearchTool) -> Result<&DependencyGuard, PipelineError> {
        self.guards
            .get(&tool)
            .ok_or_else(|| PipelineError::config(format!("no guard for tool {}", tool.name())))
    }

    pub async fn web_search(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        let engines = self.engines.as_deref();
        self.guard(ResearchTool::WebSearch)?
            .call(cancel, || self.search.search(query, max_results, engines))
            .await
    }

    pub async fn scrape(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedContent>, PipelineError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        self.guard(ResearchTool::Scrape)?
            .call(cancel, || self.scraper.scrape_and_summarize(urls))
            .await
    }

    pub async fn summarize(
        &self,
        title: &str,
        content: &str,
        max_chars: usize,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let (system, user) = ResearchPrompts::summarize_page(title, content, max_chars);
        let summary = self
            .guard(ResearchTool::Summarize)?
            .call(cancel, || {
                self.router
                    .invoke_text(ModelRole::Researcher, &system, &user, cancel)
            })
            .await?;
        Ok(truncate_chars(summary.trim(), max_chars).to_string())
    }

    /// Semantic lookup; an unconfigured store yields no hits
    pub async fn vector_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        let Some(store) = &self.vector else {
            return Ok(Vec::new());
        };
        self.guard(ResearchTool::VectorSearch)?
            .call(cancel, || store.search(query, top_k, Some(threshold)))
            .await
    }

    pub async fn extract_facts(
        &self,
        topic: &str,
        content: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fact>, PipelineError> {
        let (system, user) = ResearchPrompts::extract_facts(topic, content);
        let messages = prompt_pair(system, user);
        let extracted: FactExtractionResult = self
            .guard(ResearchTool::ExtractFacts)?
            .call(cancel, || {
                self.router
                    .invoke_structured(ModelRole::Researcher, &messages, cancel)
            })
            .await?;

        Ok(extracted
            .facts
            .into_iter()
            .filter(|fact| !fact.statement.trim().is_empty())
            .map(|mut fact| {
                if fact.source.trim().is_empty() {
                    fact.source = source.to_string();
                }
                fact.into_fact()
            })
            .collect())
    }

    /// Upsert a fact into the vector store; a no-op without store and embedder
    pub async fn index_fact(&self, fact: &Fact, cancel: &CancellationToken) -> Result<bool, PipelineError> {
        let (Some(store), Some(embedder)) = (&self.vector, &self.embedder) else {
            return Ok(false);
        };
        let embedding = embedder.embed(&fact.statement).await?;
        let metadata = serde_json::json!({
            "source": fact.source_url,
            "confidence": fact.confidence,
            "tags": fact.tags,
        });
        self.guard(ResearchTool::VectorSearch)?
            .call(cancel, || {
                store.upsert(&fact.id, &fact.statement, &embedding, Some(metadata))
            })
            .await?;
        Ok(true)
    }
}

impl std::fmt::Debug for ToolKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolKit")
            .field("vector", &self.vector.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("engines", &self.engines)
            .finish()
    }
}
