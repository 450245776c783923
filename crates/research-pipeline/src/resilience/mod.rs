//! Resilience layer: retries with fallback, circuit breaking and concurrency gating

pub mod circuit;
pub mod gate;
pub mod guard;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitSnapshot, CircuitState};
pub use gate::{ConcurrencyGate, GateConfig, GatePermit};
pub use guard::DependencyGuard;
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, RetryStats};
