//! Per-call settings and token accounting

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::AddAssign;

/// Tokens spent by one call, or summed over many
///
/// ```
/// use research_pipeline::llm::TokenUsage;
///
/// let run: TokenUsage = [TokenUsage::new(100, 50), TokenUsage::new(20, 5)].into_iter().sum();
/// assert_eq!(run.total(), 175);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn from_rig_usage(usage: &rig::completion::Usage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, usage| {
            acc += usage;
            acc
        })
    }
}

/// Model and sampling settings the router attaches to a call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LLMConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl LLMConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let mut usage = TokenUsage::new(100, 50);
        usage += TokenUsage::new(50, 25);

        assert_eq!(usage, TokenUsage::new(150, 75));
        assert_eq!(usage.total(), 225);
        assert!(TokenUsage::default().is_empty());
    }

    #[test]
    fn test_unset_sampling_fields_are_omitted() {
        let json = serde_json::to_value(LLMConfig::new("llama3.2").with_max_tokens(512)).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["max_tokens"], 512);
        assert!(json.get("temperature").is_none());
    }
}
