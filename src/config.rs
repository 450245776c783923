//! # Configuration Module
//!
//! Loads the command-line application's settings from the environment (and an
//! optional `.env` file) and turns them into a [`PipelineConfig`] for the library.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use research_pipeline::{ModelNames, PipelineConfig, ResearcherConfig, SupervisorConfig};

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Settings for one invocation of the research agent.
///
/// Role models (`brain_model`, ...) are optional; a role without its own model is
/// served by `model`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Default Ollama model (e.g. "llama3.2")
    pub model: String,

    /// Ollama server URL
    pub ollama_host: String,

    pub brain_model: Option<String>,
    pub evaluator_model: Option<String>,
    pub red_team_model: Option<String>,
    pub pruner_model: Option<String>,

    /// Sampling temperature passed to every call (0.0 - 2.0)
    pub temperature: f64,

    /// Tavily key; web search is required for a real run
    pub tavily_api_key: Option<String>,

    pub max_search_results: usize,

    /// Supervisor iterations per run
    pub max_iterations: usize,

    /// Supervisor stops once the draft scores at least this (0-10)
    pub min_quality_threshold: f64,

    /// In-flight calls allowed per dependency
    pub max_concurrent_tasks: usize,

    /// Directory for persisted research state; none keeps state in memory
    pub state_dir: Option<PathBuf>,

    /// Upper bound for a single LLM call
    pub call_timeout: Duration,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            brain_model: None,
            evaluator_model: None,
            red_team_model: None,
            pruner_model: None,
            temperature: 0.3,
            tavily_api_key: None,
            max_search_results: 5,
            max_iterations: 3,
            min_quality_threshold: 7.0,
            max_concurrent_tasks: 4,
            state_dir: None,
            call_timeout: Duration::from_secs(120),
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(val) = get("OLLAMA_MODEL") {
            config.model = val;
        }
        if let Some(val) = get("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        config.brain_model = get("BRAIN_MODEL");
        config.evaluator_model = get("EVALUATOR_MODEL");
        config.red_team_model = get("RED_TEAM_MODEL");
        config.pruner_model = get("PRUNER_MODEL");
        config.tavily_api_key = get("TAVILY_API_KEY");
        config.state_dir = get("STATE_DIR").map(PathBuf::from);

        if let Some(val) = parse(&get, "TEMPERATURE", "a number such as 0.3")? {
            config.temperature = val;
        }
        if let Some(val) = parse(&get, "MAX_SEARCH_RESULTS", "a positive integer")? {
            config.max_search_results = val;
        }
        if let Some(val) = parse(&get, "MAX_ITERATIONS", "a positive integer")? {
            config.max_iterations = val;
        }
        if let Some(val) = parse(&get, "MIN_QUALITY_THRESHOLD", "a number between 0 and 10")? {
            config.min_quality_threshold = val;
        }
        if let Some(val) = parse(&get, "MAX_CONCURRENT_TASKS", "a positive integer")? {
            config.max_concurrent_tasks = val;
        }
        if let Some(val) = parse::<u64, _>(&get, "CALL_TIMEOUT_SECS", "a number of seconds")? {
            config.call_timeout = Duration::from_secs(val);
        }
        if let Some(val) = get("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Fail fast on values the pipeline would reject later.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }
        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }
        if self.max_iterations == 0 {
            anyhow::bail!("MAX_ITERATIONS must be at least 1");
        }
        if !(0.0..=10.0).contains(&self.min_quality_threshold) {
            anyhow::bail!(
                "MIN_QUALITY_THRESHOLD must be between 0 and 10, got: {}",
                self.min_quality_threshold
            );
        }
        if self.max_concurrent_tasks == 0 {
            anyhow::bail!("MAX_CONCURRENT_TASKS must be at least 1");
        }
        if self.model.is_empty() {
            anyhow::bail!("OLLAMA_MODEL cannot be empty");
        }

        self.pipeline_config()
            .validate()
            .context("Invalid pipeline configuration")?;
        Ok(())
    }

    pub fn model_names(&self) -> ModelNames {
        let mut names = ModelNames::new(self.model.clone());
        if let Some(model) = &self.brain_model {
            names = names.with_brain(model.clone());
        }
        if let Some(model) = &self.evaluator_model {
            names = names.with_evaluator(model.clone());
        }
        if let Some(model) = &self.red_team_model {
            names = names.with_red_team(model.clone());
        }
        if let Some(model) = &self.pruner_model {
            names = names.with_pruner(model.clone());
        }
        names
    }

    /// Library configuration for these settings
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_models(self.model_names())
            .with_max_concurrent_tasks(self.max_concurrent_tasks)
            .with_call_timeout(self.call_timeout)
            .with_researcher(
                ResearcherConfig::default().with_max_search_results(self.max_search_results),
            )
            .with_supervisor(
                SupervisorConfig::default()
                    .with_max_iterations(self.max_iterations)
                    .with_min_quality(self.min_quality_threshold),
            )
    }
}

fn parse<T, G>(get: &G, key: &str, expected: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} must be {}, got '{}'", key, expected, raw))
        })
        .transpose()
}
