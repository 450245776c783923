//! LLM provider abstractions
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Workflows (researcher, supervisor,    │
//! │   agents, master)                       │
//! └─────────────────┬───────────────────────┘
//!                   │ invoke / invoke_structured
//!                   ▼
//! ┌─────────────────────────────────────────┐
//! │   ModelRouter                           │
//! │  - role → provider + model name         │
//! │  - DependencyGuard + call timeout       │
//! └─────────────────┬───────────────────────┘
//!                   │ LLMProvider::complete
//!                   ▼
//! ┌─────────────────────────────────────────┐
//! │   RigAgentAdapter (any Rig Agent<M>)    │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod message;
mod provider;
mod router;

pub use config::{LLMConfig, TokenUsage};
pub use message::{prompt_pair, Message, Role};
pub use provider::{LLMProvider, LLMResponse};
pub use router::{extract_json, parse_structured, ModelNames, ModelRole, ModelRouter};
