//! Error taxonomy for the research pipeline
//!
//! Every fallible operation in the crate returns [`PipelineError`]. The variants map
//! onto the failure categories the orchestrator treats differently:
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Transient | `Llm`, `Tool`, `Timeout`, `Store` | retried, then fallback |
//! | Malformed output | `MalformedOutput` | retried like a transient failure, then repaired |
//! | Circuit open | `CircuitOpen` | never retried, fallback or fail fast |
//! | Cancellation | `Cancelled` | terminal outcome, never retried, no fallback |
//! | Fatal | `Validation`, `Config` | surfaced immediately |

use thiserror::Error;

/// Top-level error for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Malformed {expected} output: {reason}")]
    MalformedOutput { expected: String, reason: String },

    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Operation '{label}' timed out")]
    Timeout { label: String },

    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("'{label}' failed ({original}) and its fallback also failed ({fallback})")]
    FallbackFailed {
        label: String,
        original: Box<PipelineError>,
        fallback: Box<PipelineError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    pub fn malformed(expected: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            expected: expected.into(),
            reason: reason.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn timeout(label: impl Into<String>) -> Self {
        Self::Timeout {
            label: label.into(),
        }
    }

    pub fn circuit_open(dependency: impl Into<String>) -> Self {
        Self::CircuitOpen {
            dependency: dependency.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether another attempt of the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Llm(_)
                | Self::MalformedOutput { .. }
                | Self::Tool { .. }
                | Self::Timeout { .. }
                | Self::Store(_)
                | Self::Serialization(_)
        )
    }

    /// Fatal errors abort a pipeline run outright
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether a circuit breaker should record this outcome as a dependency failure
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::CircuitOpen { .. })
    }
}
