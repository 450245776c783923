//! Rig agents as pipeline LLM providers
//!
//! The pipeline speaks in [`Message`] lists; a Rig agent wants a preamble, a chat
//! history and one prompt. System messages are joined onto the agent's own preamble,
//! the final message is the prompt and the turns before it are history.
//!
//! ```rust,ignore
//! use rig::client::{CompletionClient, ProviderClient};
//! use rig::providers::ollama;
//! use research_pipeline::compat::RigAgentAdapter;
//!
//! let agent = ollama::Client::from_env().agent("llama3.2").build();
//! let provider = RigAgentAdapter::with_names(agent, "ollama", "llama3.2");
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use rig::agent::Agent;
use rig::completion::{Completion, CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::OneOrMany;

use crate::error::PipelineError;
use crate::llm::{LLMConfig, LLMProvider, LLMResponse, Message, Role, TokenUsage};

pub struct RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    agent: Arc<Agent<M>>,
    provider: String,
    model: String,
}

impl<M> RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    pub fn new(agent: Agent<M>) -> Self {
        Self::with_names(agent, "rig", "rig-agent")
    }

    /// Names reported in logs and usage records
    pub fn with_names(agent: Agent<M>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: Arc::new(agent),
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn agent(&self) -> &Agent<M> {
        &self.agent
    }

    fn preamble_with(&self, system: &str) -> String {
        match self.agent.preamble.as_deref() {
            Some(own) if !own.trim().is_empty() => format!("{}\n\n{}", own, system),
            _ => system.to_string(),
        }
    }
}

fn rig_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::llm(format!("Rig agent error: {}", e))
}

#[async_trait]
impl<M> LLMProvider for RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    async fn complete(
        &self,
        messages: &[Message],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, PipelineError> {
        let turns = Turns::from(messages);
        let mut request = self
            .agent
            .completion(turns.prompt, turns.history)
            .await
            .map_err(rig_error)?;

        if let Some(system) = turns.system {
            request = request.preamble(self.preamble_with(&system));
        }
        if let Some(temperature) = config.and_then(|c| c.temperature) {
            request = request.temperature(temperature);
        }
        if let Some(max_tokens) = config.and_then(|c| c.max_tokens) {
            request = request.max_tokens(max_tokens);
        }

        let response = request.send().await.map_err(rig_error)?;

        let reply = LLMResponse::new(Message::assistant(assistant_text(&response.choice)));
        let usage = TokenUsage::from_rig_usage(&response.usage);
        Ok(if usage.is_empty() {
            reply
        } else {
            reply.with_usage(usage)
        })
    }

    fn name(&self) -> &str {
        &self.provider
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// A pipeline conversation split the way Rig's completion API takes it
struct Turns {
    system: Option<String>,
    history: Vec<RigMessage>,
    prompt: RigMessage,
}

impl From<&[Message]> for Turns {
    fn from(messages: &[Message]) -> Self {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
            .collect();

        let mut history: Vec<RigMessage> = messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(RigMessage::user(m.content.clone())),
                Role::Assistant => Some(RigMessage::assistant(m.content.clone())),
            })
            .collect();
        let prompt = history.pop().unwrap_or_else(|| RigMessage::user(""));

        Self {
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            history,
            prompt,
        }
    }
}

/// Text parts of the choice joined; tool calls and reasoning are dropped
fn assistant_text(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|part| match part {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect()
}

impl<M> std::fmt::Debug for RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigAgentAdapter")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}
