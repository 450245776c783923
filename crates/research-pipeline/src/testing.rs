//! Scripted collaborators for unit and integration tests
//!
//! These implement the crate's traits with canned behavior and call counters, so
//! workflows can be driven without a model or network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::PipelineError;
use crate::llm::{LLMConfig, LLMProvider, LLMResponse, Message, TokenUsage};
use crate::tools::{
    ScrapedContent, Scraper, SearchClient, SearchResult, VectorHit, VectorStore,
};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: Vec<Reply>,
    served: usize,
}

/// LLM provider answering from substring rules
///
/// A rule matches when its needle occurs in any message of the request. Rules are
/// checked in insertion order; a rule with several replies serves them in sequence
/// and then repeats the last one. Requests no rule matches get the default reply.
#[derive(Debug)]
pub struct ScriptedProvider {
    default: Reply,
    rules: Mutex<Vec<Rule>>,
    delay: Option<Duration>,
    usage: Option<TokenUsage>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: Reply::Text(default.into()),
            rules: Mutex::new(Vec::new()),
            delay: None,
            usage: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose every unmatched call fails with an LLM error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            default: Reply::Fail(message.into()),
            ..Self::new("")
        }
    }

    pub fn with_rule(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push_rule(needle, vec![Reply::Text(reply.into())])
    }

    pub fn with_sequence<S: Into<String>>(
        self,
        needle: impl Into<String>,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        let replies = replies.into_iter().map(|r| Reply::Text(r.into())).collect();
        self.push_rule(needle, replies)
    }

    pub fn with_failure(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.push_rule(needle, vec![Reply::Fail(message.into())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    fn push_rule(self, needle: impl Into<String>, replies: Vec<Reply>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.into(),
                replies,
                served: 0,
            });
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls whose messages contained `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .map(|p| p.iter().filter(|text| text.contains(needle)).count())
            .unwrap_or(0)
    }

    fn reply_for(&self, text: &str) -> Reply {
        let Ok(mut rules) = self.rules.lock() else {
            return self.default.clone();
        };
        for rule in rules.iter_mut() {
            if text.contains(&rule.needle) && !rule.replies.is_empty() {
                let idx = rule.served.min(rule.replies.len() - 1);
                rule.served += 1;
                return rule.replies[idx].clone();
            }
        }
        self.default.clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(text.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.reply_for(&text) {
            Reply::Text(content) => {
                let response = LLMResponse::new(Message::assistant(content));
                Ok(match self.usage {
                    Some(usage) => response.with_usage(usage),
                    None => response,
                })
            }
            Reply::Fail(message) => Err(PipelineError::llm(message)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Search client returning the same results for every query
#[derive(Debug, Default)]
pub struct StaticSearch {
    results: Vec<SearchResult>,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    /// One result per given URL
    pub fn with_urls(urls: &[&str]) -> Self {
        Self::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| SearchResult {
                    title: format!("Result {}", i + 1),
                    url: url.to_string(),
                    snippet: format!("Snippet for {}", url),
                    score: 0.8,
                })
                .collect(),
        )
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchClient for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _engines: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PipelineError::tool("web_search", "search backend unavailable"));
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

/// Scraper producing a short page per URL
#[derive(Debug, Default)]
pub struct StaticScraper {
    summaries: bool,
    calls: AtomicUsize,
}

impl StaticScraper {
    /// Pages come back already summarized
    pub fn with_summaries() -> Self {
        Self {
            summaries: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn scrape_and_summarize(&self, urls: &[String]) -> Result<Vec<ScrapedContent>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(urls
            .iter()
            .map(|url| ScrapedContent {
                url: url.clone(),
                title: format!("Page at {}", url),
                content: format!("Full content scraped from {}", url),
                summary: self.summaries.then(|| format!("Summary of {}", url)),
            })
            .collect())
    }
}

/// Vector store with fixed hits that counts searches and upserts
#[derive(Debug, Default)]
pub struct StaticVectorStore {
    hits: Vec<VectorHit>,
    delay: Option<Duration>,
    searches: AtomicUsize,
    upserts: AtomicUsize,
}

impl StaticVectorStore {
    pub fn new(hits: Vec<VectorHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for StaticVectorStore {
    async fn search(
        &self,
        _query: &str,
        top_k: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let threshold = score_threshold.unwrap_or(0.0);
        Ok(self
            .hits
            .iter()
            .filter(|h| h.score >= threshold)
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn upsert(
        &self,
        _id: &str,
        _content: &str,
        _embedding: &[f32],
        _metadata: Option<serde_json::Value>,
    ) -> Result<(), PipelineError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rules_and_sequences() {
        let provider = ScriptedProvider::new("default")
            .with_sequence("decide", ["search for qubits", "enough"])
            .with_failure("explode", "boom");

        let ask = |text: &str| vec![Message::user(text)];
        assert_eq!(provider.complete(&ask("decide now"), None).await.unwrap().message.content, "search for qubits");
        assert_eq!(provider.complete(&ask("decide now"), None).await.unwrap().message.content, "enough");
        assert_eq!(provider.complete(&ask("decide again"), None).await.unwrap().message.content, "enough");
        assert!(provider.complete(&ask("explode"), None).await.is_err());
        assert_eq!(provider.complete(&ask("other"), None).await.unwrap().message.content, "default");

        assert_eq!(provider.calls(), 5);
        assert_eq!(provider.calls_matching("decide"), 3);
    }
}
