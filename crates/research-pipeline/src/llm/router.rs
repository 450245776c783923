//! Role-based model routing
//!
//! Each pipeline role (brain, evaluator, red team, pruner, ...) can be served by its
//! own provider and model name. Every call goes through the shared LLM
//! [`DependencyGuard`] and a per-call timeout.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::{LLMConfig, TokenUsage};
use super::message::Message;
use super::provider::LLMProvider;
use crate::error::PipelineError;
use crate::resilience::DependencyGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Default,
    Researcher,
    Brain,
    Evaluator,
    RedTeam,
    Pruner,
    Analyst,
    Report,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Researcher => "researcher",
            Self::Brain => "brain",
            Self::Evaluator => "evaluator",
            Self::RedTeam => "red_team",
            Self::Pruner => "pruner",
            Self::Analyst => "analyst",
            Self::Report => "report",
        }
    }
}

/// Model names per role; unset roles use `default`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelNames {
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruner: Option<String>,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            default: "llama3.2".to_string(),
            brain: None,
            evaluator: None,
            red_team: None,
            pruner: None,
        }
    }
}

impl ModelNames {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            ..Default::default()
        }
    }

    pub fn with_brain(mut self, model: impl Into<String>) -> Self {
        self.brain = Some(model.into());
        self
    }

    pub fn with_evaluator(mut self, model: impl Into<String>) -> Self {
        self.evaluator = Some(model.into());
        self
    }

    pub fn with_red_team(mut self, model: impl Into<String>) -> Self {
        self.red_team = Some(model.into());
        self
    }

    pub fn with_pruner(mut self, model: impl Into<String>) -> Self {
        self.pruner = Some(model.into());
        self
    }

    pub fn for_role(&self, role: ModelRole) -> &str {
        let specific = match role {
            ModelRole::Brain => self.brain.as_deref(),
            ModelRole::Evaluator => self.evaluator.as_deref(),
            ModelRole::RedTeam => self.red_team.as_deref(),
            ModelRole::Pruner => self.pruner.as_deref(),
            _ => None,
        };
        specific.unwrap_or(&self.default)
    }
}

pub struct ModelRouter {
    default: Arc<dyn LLMProvider>,
    overrides: HashMap<ModelRole, Arc<dyn LLMProvider>>,
    models: ModelNames,
    guard: DependencyGuard,
    call_timeout: Duration,
    temperature: Option<f64>,
    usage: Mutex<TokenUsage>,
}

impl ModelRouter {
    pub fn new(default: Arc<dyn LLMProvider>, guard: DependencyGuard) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            models: ModelNames::default(),
            guard,
            call_timeout: Duration::from_secs(120),
            temperature: None,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Serve `role` with a dedicated provider
    pub fn with_provider(mut self, role: ModelRole, provider: Arc<dyn LLMProvider>) -> Self {
        self.overrides.insert(role, provider);
        self
    }

    pub fn with_models(mut self, models: ModelNames) -> Self {
        self.models = models;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn models(&self) -> &ModelNames {
        &self.models
    }

    pub fn guard(&self) -> &DependencyGuard {
        &self.guard
    }

    /// Tokens consumed by every call routed so far
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn provider(&self, role: ModelRole) -> &Arc<dyn LLMProvider> {
        self.overrides.get(&role).unwrap_or(&self.default)
    }

    /// Plain chat completion for `role`
    pub async fn invoke(
        &self,
        role: ModelRole,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, PipelineError> {
        let provider = self.provider(role);
        let mut config = LLMConfig::new(self.models.for_role(role));
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }

        debug!(
            role = role.as_str(),
            provider = provider.name(),
            model = %config.model,
            messages = messages.len(),
            "Invoking model"
        );

        let timeout = self.call_timeout;
        let response = self
            .guard
            .call(cancel, || async {
                match tokio::time::timeout(timeout, provider.complete(messages, Some(&config))).await
                {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::timeout(format!("llm:{}", role.as_str()))),
                }
            })
            .await?;

        if let Some(usage) = response.usage {
            *self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += usage;
        }

        Ok(response.message)
    }

    /// Completion text for a system instruction and one user turn
    pub async fn invoke_text(
        &self,
        role: ModelRole,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let messages = [Message::system(system), Message::user(user)];
        self.invoke(role, &messages, cancel)
            .await
            .map(|message| message.content)
    }

    /// Completion parsed into `T`, failing with `MalformedOutput` on non-conforming text
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        role: ModelRole,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<T, PipelineError> {
        let message = self.invoke(role, messages, cancel).await?;
        parse_structured(&message.content)
    }
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("default", &self.default.name())
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("models", &self.models)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// First JSON object or array in `text`, fenced or bare
pub fn extract_json(text: &str) -> Option<&str> {
    let fenced = fence_pattern()
        .and_then(|fence| fence.captures(text))
        .and_then(|captures| captures.get(1))
        .and_then(|inner| scan_json(inner.as_str()));
    fenced.or_else(|| scan_json(text))
}

/// Balanced-bracket scan that ignores brackets inside string literals
fn scan_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse LLM output into `T`
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, PipelineError> {
    let expected = short_type_name::<T>();
    let json = extract_json(text)
        .ok_or_else(|| PipelineError::malformed(expected, "no JSON value in model output"))?;
    serde_json::from_str(json).map_err(|e| PipelineError::malformed(expected, e.to_string()))
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use crate::testing::ScriptedProvider;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        score: f64,
        summary: String,
    }

    fn guard() -> DependencyGuard {
        DependencyGuard::standalone("llm", CircuitBreakerConfig::default(), 4)
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"score\": 7.5, \"summary\": \"ok\"}\n```\nThanks";
        assert_eq!(extract_json(text), Some("{\"score\": 7.5, \"summary\": \"ok\"}"));
    }

    #[test]
    fn test_extract_bare_json_with_braces_in_strings() {
        let text = r#"Result: {"summary": "uses {curly} braces", "score": 3} trailing"#;
        let parsed: Verdict = parse_structured(text).unwrap();
        assert_eq!(parsed.summary, "uses {curly} braces");
        assert_eq!(parsed.score, 3.0);
    }

    #[test]
    fn test_extract_array() {
        let topics: Vec<String> = parse_structured("Topics: [\"a\", \"b\"]").unwrap();
        assert_eq!(topics, vec!["a", "b"]);
    }

    #[test]
    fn test_malformed_output_is_typed() {
        let err = parse_structured::<Verdict>("no json here").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { ref expected, .. } if expected == "Verdict"));

        let err = parse_structured::<Verdict>(r#"{"score": "high"}"#).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_model_names_for_role() {
        let names = ModelNames::new("llama3.2").with_brain("qwen2.5").with_pruner("phi3");
        assert_eq!(names.for_role(ModelRole::Brain), "qwen2.5");
        assert_eq!(names.for_role(ModelRole::Pruner), "phi3");
        assert_eq!(names.for_role(ModelRole::Evaluator), "llama3.2");
        assert_eq!(names.for_role(ModelRole::Report), "llama3.2");
    }

    #[tokio::test]
    async fn test_role_override_provider() {
        let default = Arc::new(ScriptedProvider::new("default answer"));
        let brain = Arc::new(ScriptedProvider::new("brain answer"));
        let router = ModelRouter::new(default.clone(), guard())
            .with_provider(ModelRole::Brain, brain.clone());
        let cancel = CancellationToken::new();

        let text = router
            .invoke_text(ModelRole::Brain, "sys", "next?", &cancel)
            .await
            .unwrap();
        assert_eq!(text, "brain answer");
        assert_eq!(brain.calls(), 1);
        assert_eq!(default.calls(), 0);
    }

    #[tokio::test]
    async fn test_invoke_structured() {
        let provider = Arc::new(ScriptedProvider::new(
            "```json\n{\"score\": 8.0, \"summary\": \"solid\"}\n```",
        ));
        let router = ModelRouter::new(provider, guard());
        let cancel = CancellationToken::new();

        let verdict: Verdict = router
            .invoke_structured(ModelRole::Evaluator, &[Message::user("grade")], &cancel)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict {
                score: 8.0,
                summary: "solid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let provider = Arc::new(ScriptedProvider::new("late").with_delay(Duration::from_millis(200)));
        let router = ModelRouter::new(provider, guard()).with_timeout(Duration::from_millis(20));
        let cancel = CancellationToken::new();

        let err = router
            .invoke(ModelRole::Default, &[Message::user("hi")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let provider = Arc::new(ScriptedProvider::new("ok").with_usage(TokenUsage::new(10, 5)));
        let router = ModelRouter::new(provider, guard());
        let cancel = CancellationToken::new();

        router.invoke(ModelRole::Default, &[Message::user("a")], &cancel).await.unwrap();
        router.invoke(ModelRole::Default, &[Message::user("b")], &cancel).await.unwrap();
        assert_eq!(router.usage().total(), 30);
    }
}
