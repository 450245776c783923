//! Page fetching with plain-text extraction

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ScrapedContent, Scraper};
use crate::error::PipelineError;
use crate::text::truncate_chars;

const DEFAULT_MAX_CONTENT_CHARS: usize = 6000;

struct HtmlCleaner {
    blocks: Regex,
    tags: Regex,
    title: Regex,
}

impl HtmlCleaner {
    fn new() -> Result<Self, PipelineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PipelineError::config(format!("scraper regex: {e}")))
        };
        Ok(Self {
            blocks: compile(r"(?is)<(script|style|noscript|head)\b.*?</(script|style|noscript|head)>")?,
            tags: compile(r"(?s)<[^>]*>")?,
            title: compile(r"(?is)<title[^>]*>(.*?)</title>")?,
        })
    }

    fn title(&self, html: &str) -> Option<String> {
        self.title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| decode_entities(m.as_str().trim()))
            .filter(|t| !t.is_empty())
    }

    fn text(&self, html: &str) -> String {
        let without_blocks = self.blocks.replace_all(html, " ");
        let without_tags = self.tags.replace_all(&without_blocks, " ");
        decode_entities(&without_tags)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// [`Scraper`] that fetches pages over HTTP and strips markup
///
/// Pages are fetched concurrently. A page that fails to load is logged and left out,
/// so the result may be shorter than the input.
pub struct HttpScraper {
    client: Client,
    timeout: Duration,
    max_content_chars: usize,
    cleaner: HtmlCleaner,
}

impl HttpScraper {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            client: Client::new(),
            timeout: Duration::from_secs(20),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            cleaner: HtmlCleaner::new()?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_content_chars(mut self, chars: usize) -> Self {
        self.max_content_chars = chars;
        self
    }

    async fn fetch(&self, url: &str) -> Result<ScrapedContent, PipelineError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::timeout(format!("scrape:{url}"))
                } else {
                    PipelineError::tool("scrape", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::tool(
                "scrape",
                format!("{url} returned {}", status.as_u16()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::tool("scrape", e.to_string()))?;

        let text = self.cleaner.text(&html);
        Ok(ScrapedContent {
            url: url.to_string(),
            title: self.cleaner.title(&html).unwrap_or_else(|| url.to_string()),
            content: truncate_chars(&text, self.max_content_chars).to_string(),
            summary: None,
        })
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape_and_summarize(&self, urls: &[String]) -> Result<Vec<ScrapedContent>, PipelineError> {
        let fetched = join_all(urls.iter().map(|url| self.fetch(url))).await;

        let pages: Vec<ScrapedContent> = fetched
            .into_iter()
            .zip(urls)
            .filter_map(|(result, url)| match result {
                Ok(page) if !page.content.is_empty() => Some(page),
                Ok(_) => {
                    debug!(url = %url, "Skipping page with no text");
                    None
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to scrape page");
                    None
                }
            })
            .collect();

        debug!(requested = urls.len(), scraped = pages.len(), "Scrape finished");
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><head><title>Qubits &amp; Gates</title>
        <style>body { color: red; }</style></head>
        <body><script>var x = 1;</script>
        <h1>Qubits</h1><p>A qubit holds&nbsp;a superposition.</p></body></html>"#;

    #[test]
    fn test_cleaner_strips_markup() {
        let cleaner = HtmlCleaner::new().unwrap();
        assert_eq!(cleaner.title(PAGE).as_deref(), Some("Qubits & Gates"));

        let text = cleaner.text(PAGE);
        assert_eq!(text, "Qubits A qubit holds a superposition.");
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[tokio::test]
    async fn test_scrape_skips_failed_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let scraper = HttpScraper::new().unwrap();
        let urls = vec![format!("{}/ok", server.uri()), format!("{}/missing", server.uri())];
        let pages = scraper.scrape_and_summarize(&urls).await.unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].title, "Qubits & Gates");
        assert!(pages[0].content.contains("superposition"));
        assert!(pages[0].summary.is_none());
    }

    #[tokio::test]
    async fn test_content_is_truncated() {
        let server = MockServer::start().await;
        let body = format!("<p>{}</p>", "word ".repeat(500));
        Mock::given(method("GET"))
            .and(path("/long"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let scraper = HttpScraper::new().unwrap().with_max_content_chars(100);
        let pages = scraper
            .scrape_and_summarize(&[format!("{}/long", server.uri())])
            .await
            .unwrap();

        assert_eq!(pages[0].content.chars().count(), 100);
        assert_eq!(pages[0].title, format!("{}/long", server.uri()));
    }
}
