//! The provider seam
//!
//! Everything that talks to a model implements [`LLMProvider`]: the Rig adapter in
//! production, scripted providers in tests. Structured output, timeouts and guards
//! are layered on top by [`ModelRouter`](super::ModelRouter).

use async_trait::async_trait;

use super::config::{LLMConfig, TokenUsage};
use super::message::Message;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct LLMResponse {
    pub message: Message,
    /// Absent when the backend does not report usage
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One chat completion over `messages`
    async fn complete(
        &self,
        messages: &[Message],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, PipelineError>;

    fn name(&self) -> &str;

    fn default_model(&self) -> &str;
}
