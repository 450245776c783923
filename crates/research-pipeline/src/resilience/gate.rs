//! Counting semaphore that bounds in-flight calls to a dependency

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_concurrent_tasks: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
        }
    }
}

/// Held while a call is in flight; dropping it frees the slot
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.max_concurrent_tasks)
    }

    /// Wait for a slot, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map(|permit| GatePermit { _permit: permit })
                .map_err(|_| PipelineError::Cancelled),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}
