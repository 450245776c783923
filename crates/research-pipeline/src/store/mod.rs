//! Persistence boundaries
//!
//! [`StateStore`] keeps [`ResearchState`] snapshots keyed by research id, so progress
//! can be looked up without re-running a pipeline. [`JobStore`] tracks
//! fire-and-forget pipeline runs. "Not found" is `Ok(None)` at both boundaries.

mod file;
mod jobs;

pub use file::FileStateStore;
pub use jobs::{JobRecord, JobStatus, JobStore, MemoryJobStore, DEFAULT_JOB_TTL};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::PipelineError;
use crate::research::ResearchState;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, research_id: &str) -> Result<Option<ResearchState>, PipelineError>;

    async fn set(&self, research_id: &str, state: &ResearchState) -> Result<(), PipelineError>;

    /// Returns whether anything was removed
    async fn delete(&self, research_id: &str) -> Result<bool, PipelineError>;

    async fn list_ids(&self) -> Result<Vec<String>, PipelineError>;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, ResearchState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, research_id: &str) -> Result<Option<ResearchState>, PipelineError> {
        Ok(self.states.read().await.get(research_id).cloned())
    }

    async fn set(&self, research_id: &str, state: &ResearchState) -> Result<(), PipelineError> {
        self.states
            .write()
            .await
            .insert(research_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, research_id: &str) -> Result<bool, PipelineError> {
        Ok(self.states.write().await.remove(research_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, PipelineError> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
