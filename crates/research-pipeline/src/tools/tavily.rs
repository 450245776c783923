//! Tavily web search client
//!
//! Transport failures and 429/5xx answers are retried with the backoff of a
//! [`RetryPolicy`]. Other statuses and undecodable bodies fail immediately.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{SearchClient, SearchResult};
use crate::error::PipelineError;
use crate::resilience::RetryPolicy;

const TAVILY_API: &str = "https://api.tavily.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

/// Tavily index to query; "news" among requested engines selects the news index
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Index {
    #[default]
    General,
    News,
}

impl Index {
    fn for_engines(engines: Option<&[String]>) -> Self {
        let wants_news = engines
            .unwrap_or_default()
            .iter()
            .any(|engine| engine.eq_ignore_ascii_case("news"));
        if wants_news {
            Index::News
        } else {
            Index::General
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TavilyError {
    #[error("Tavily request timed out")]
    Timeout,

    #[error("Tavily unreachable: {0}")]
    Transport(String),

    #[error("Tavily answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Could not parse Tavily response: {0}")]
    Decode(String),
}

impl TavilyError {
    /// Worth another attempt: transport trouble, throttling or a server fault
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Decode(_) => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<TavilyError> for PipelineError {
    fn from(e: TavilyError) -> Self {
        match e {
            TavilyError::Timeout => PipelineError::timeout("tool:tavily"),
            other => PipelineError::tool("tavily", other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: SearchDepth,
    topic: Index,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

/// [`SearchClient`] backed by the Tavily search API
#[derive(Debug, Clone)]
pub struct TavilySearchClient {
    http: Client,
    api_key: String,
    endpoint: String,
    request_timeout: Duration,
    retry: RetryPolicy,
    depth: SearchDepth,
}

impl TavilySearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            endpoint: format!("{}/search", TAVILY_API),
            request_timeout: REQUEST_TIMEOUT,
            retry: RetryPolicy::new(3),
            depth: SearchDepth::default(),
        }
    }

    /// Reads the key from `TAVILY_API_KEY`
    pub fn from_env() -> Result<Self, PipelineError> {
        std::env::var("TAVILY_API_KEY")
            .map(Self::new)
            .map_err(|_| PipelineError::config("TAVILY_API_KEY is not set"))
    }

    /// Point at another host (mock servers, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint = format!("{}/search", base_url.into().trim_end_matches('/'));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_search_depth(mut self, depth: SearchDepth) -> Self {
        self.depth = depth;
        self
    }

    async fn post(&self, request: &SearchRequest<'_>) -> Result<SearchResponse, TavilyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(TavilyError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TavilyError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| TavilyError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SearchClient for TavilySearchClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        engines: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        let request = SearchRequest {
            query,
            max_results,
            search_depth: self.depth,
            topic: Index::for_engines(engines),
            include_answer: false,
            include_raw_content: false,
        };
        debug!(query, max_results, topic = ?request.topic, "Tavily search");

        let mut retries = 0;
        let response = loop {
            match self.post(&request).await {
                Ok(response) => break response,
                Err(e) if e.is_transient() && self.retry.should_retry(retries) => {
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(retries, error = %e, delay_ms = delay.as_millis() as u64, "Tavily search failed, backing off");
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(response
            .results
            .into_iter()
            .map(|hit| SearchResult {
                title: hit.title,
                url: hit.url,
                snippet: hit.content,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TavilySearchClient {
        TavilySearchClient::new("tvly-test")
            .with_base_url(server.uri())
            .with_retry_policy(RetryPolicy::new(2).with_fixed_delay(Duration::from_millis(5)))
    }

    fn two_hits() -> serde_json::Value {
        serde_json::json!({
            "query": "fusion reactors",
            "results": [
                {"title": "ITER", "url": "https://www.iter.org", "content": "Tokamak under construction", "score": 0.93},
                {"title": "Wendelstein 7-X", "url": "https://www.ipp.mpg.de/w7x", "content": "Stellarator", "score": 0.81}
            ]
        })
    }

    async fn mount(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_transient_classification() {
        assert!(TavilyError::Timeout.is_transient());
        assert!(TavilyError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new()
        }
        .is_transient());
        assert!(TavilyError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new()
        }
        .is_transient());
        assert!(!TavilyError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: String::new()
        }
        .is_transient());
        assert!(!TavilyError::Decode("eof".into()).is_transient());
        assert!(matches!(
            PipelineError::from(TavilyError::Timeout),
            PipelineError::Timeout { .. }
        ));
    }

    #[test]
    fn test_news_engine_selects_news_index() {
        assert_eq!(Index::for_engines(None), Index::General);
        assert_eq!(
            Index::for_engines(Some(&["bing".to_string(), "NEWS".to_string()])),
            Index::News
        );

        let request = SearchRequest {
            query: "fusion",
            max_results: 3,
            search_depth: SearchDepth::Advanced,
            topic: Index::News,
            include_answer: false,
            include_raw_content: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["search_depth"], "advanced");
        assert_eq!(json["topic"], "news");
    }

    #[tokio::test]
    async fn test_search_maps_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer tvly-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(two_hits()))
            .mount(&server)
            .await;

        let results = client(&server).search("fusion reactors", 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.iter.org");
        assert_eq!(results[1].snippet, "Stellarator");
        assert!((results[0].score - 0.93).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unauthorized_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).search("q", 3, None).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount(&server, ResponseTemplate::new(200).set_body_json(two_hits())).await;

        let results = client(&server).search("q", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_throttling_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).search("q", 2, None).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_empty_and_malformed_bodies() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []}))).await;
        assert!(client(&server).search("q", 2, None).await.unwrap().is_empty());

        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;
        let err = client(&server).search("q", 2, None).await.unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
