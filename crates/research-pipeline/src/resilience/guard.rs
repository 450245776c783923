//! Gate and breaker composed for one named dependency

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry};
use super::gate::ConcurrencyGate;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct DependencyGuard {
    name: String,
    gate: ConcurrencyGate,
    breaker: Arc<CircuitBreaker>,
}

impl DependencyGuard {
    pub fn new(name: impl Into<String>, gate: ConcurrencyGate, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: name.into(),
            gate,
            breaker,
        }
    }

    /// Guard backed by the registry's shared breaker for `name`
    pub fn from_registry(name: &str, registry: &CircuitRegistry, max_concurrent: usize) -> Self {
        Self::new(name, ConcurrencyGate::new(max_concurrent), registry.breaker(name))
    }

    /// Guard with a private breaker, mostly useful in tests
    pub fn standalone(name: &str, config: CircuitBreakerConfig, max_concurrent: usize) -> Self {
        Self::new(
            name,
            ConcurrencyGate::new(max_concurrent),
            Arc::new(CircuitBreaker::new(name, config)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Acquire a permit, then run `operation` through the breaker
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let _permit = self.gate.acquire(cancel).await?;
        debug!(dependency = %self.name, available = self.gate.available(), "Permit acquired");
        self.breaker.call(operation).await
    }
}
