//! Pipeline configuration
//!
//! All settings are serde-loadable; durations use humantime strings ("30s", "2m").
//!
//! # Example
//!
//! ```
//! use research_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{
//!     "call_timeout": "45s",
//!     "supervisor": { "max_iterations": 3, "min_quality_threshold": 7.5 }
//! }"#).unwrap();
//!
//! assert_eq!(config.supervisor.max_iterations, 3);
//! assert_eq!(config.researcher.max_iterations, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;
use crate::llm::ModelNames;
use crate::resilience::{CircuitBreakerConfig, GateConfig, RetryPolicy};

/// Settings for the tool-calling research loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearcherConfig {
    pub max_iterations: usize,
    pub max_queries_per_iteration: usize,
    pub max_search_results: usize,
    pub vector_top_k: usize,
    /// Minimum vector relevance, 0..1
    pub vector_score_threshold: f64,
    /// Knowledge-base notes are cut to this many characters
    pub note_preview_chars: usize,
    pub summary_max_chars: usize,
}

impl Default for ResearcherConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_queries_per_iteration: 2,
            max_search_results: 3,
            vector_top_k: 5,
            vector_score_threshold: 0.6,
            note_preview_chars: 280,
            summary_max_chars: 400,
        }
    }
}

impl ResearcherConfig {
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_max_queries(mut self, queries: usize) -> Self {
        self.max_queries_per_iteration = queries;
        self
    }

    pub fn with_max_search_results(mut self, results: usize) -> Self {
        self.max_search_results = results;
        self
    }
}

/// Settings for the supervision loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_iterations: usize,
    /// 0..10
    pub min_quality_threshold: f64,
    /// Iterations before the LLM evaluator replaces the heuristic
    pub evaluator_floor: usize,
    pub max_topics_per_iteration: usize,
    pub prune_threshold_chars: usize,
    pub max_pruned_facts: usize,
    pub red_team_draft_chars: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            min_quality_threshold: 8.0,
            evaluator_floor: 3,
            max_topics_per_iteration: 3,
            prune_threshold_chars: 4000,
            max_pruned_facts: 10,
            red_team_draft_chars: 800,
        }
    }
}

impl SupervisorConfig {
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_min_quality(mut self, threshold: f64) -> Self {
        self.min_quality_threshold = threshold;
        self
    }

    pub fn with_evaluator_floor(mut self, floor: usize) -> Self {
        self.evaluator_floor = floor;
        self
    }

    pub fn with_max_topics(mut self, topics: usize) -> Self {
        self.max_topics_per_iteration = topics;
        self
    }

    pub fn with_prune_threshold(mut self, chars: usize) -> Self {
        self.prune_threshold_chars = chars;
        self
    }
}

/// Top-level configuration shared by every workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub gate: GateConfig,
    pub researcher: ResearcherConfig,
    pub supervisor: SupervisorConfig,
    pub models: ModelNames,
    /// Upper bound for a single LLM call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            gate: GateConfig::default(),
            researcher: ResearcherConfig::default(),
            supervisor: SupervisorConfig::default(),
            models: ModelNames::default(),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.gate.max_concurrent_tasks = tasks;
        self
    }

    pub fn with_researcher(mut self, researcher: ResearcherConfig) -> Self {
        self.researcher = researcher;
        self
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_models(mut self, models: ModelNames) -> Self {
        self.models = models;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.circuit.validate()?;

        if self.gate.max_concurrent_tasks == 0 {
            return Err(PipelineError::config("max_concurrent_tasks must be at least 1"));
        }
        if self.researcher.max_iterations == 0 {
            return Err(PipelineError::config("researcher.max_iterations must be at least 1"));
        }
        if self.researcher.max_queries_per_iteration == 0 {
            return Err(PipelineError::config(
                "researcher.max_queries_per_iteration must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.researcher.vector_score_threshold) {
            return Err(PipelineError::config(
                "researcher.vector_score_threshold must be within 0..1",
            ));
        }
        if self.supervisor.max_iterations == 0 {
            return Err(PipelineError::config("supervisor.max_iterations must be at least 1"));
        }
        if !(0.0..=10.0).contains(&self.supervisor.min_quality_threshold) {
            return Err(PipelineError::config(
                "supervisor.min_quality_threshold must be within 0..10",
            ));
        }
        if self.supervisor.max_topics_per_iteration == 0 {
            return Err(PipelineError::config(
                "supervisor.max_topics_per_iteration must be at least 1",
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(PipelineError::config("call_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.gate.max_concurrent_tasks, 10);
        assert_eq!(config.researcher.max_search_results, 3);
        assert_eq!(config.researcher.vector_top_k, 5);
        assert_eq!(config.supervisor.min_quality_threshold, 8.0);
        assert_eq!(config.supervisor.evaluator_floor, 3);
        assert_eq!(config.supervisor.prune_threshold_chars, 4000);
        assert_eq!(config.call_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_json_with_humantime_durations() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "retry": { "max_retries": 4, "backoff_base": "250ms", "backoff_max": "5s" },
                "circuit": { "break_duration": "2m" },
                "call_timeout": "30s"
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.backoff_base, Duration::from_millis(250));
        assert_eq!(config.circuit.break_duration, Duration::from_secs(120));
        assert_eq!(config.circuit.minimum_throughput, 10);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let config = PipelineConfig::default()
            .with_supervisor(SupervisorConfig::default().with_min_quality(11.0));
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig::default().with_max_concurrent_tasks(0);
        assert!(config.validate().is_err());

        let err = PipelineConfig::from_json_str(r#"{"researcher": {"max_iterations": 0}}"#)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
