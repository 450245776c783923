//! Failure-rate circuit breaker
//!
//! One breaker guards one external dependency. Outcomes are sampled in a rolling
//! window; when the window holds enough samples, enough failures and a high enough
//! failure rate, the circuit opens and calls are rejected (or diverted to a fallback)
//! without reaching the dependency. After `break_duration` a single trial call is
//! admitted: success closes the circuit, failure re-opens it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Minimum failures in the window before the circuit may open
    pub failure_threshold: usize,

    /// Minimum samples in the window before the circuit may open
    pub minimum_throughput: usize,

    #[serde(with = "humantime_serde")]
    pub sampling_duration: Duration,

    /// Failure percentage (0..100) at which the circuit opens
    pub failure_rate_threshold: f64,

    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,

    /// Divert to the caller's fallback while open instead of failing fast
    pub enable_fallback: bool,

    pub log_state_changes: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            minimum_throughput: 10,
            sampling_duration: Duration::from_secs(30),
            failure_rate_threshold: 50.0,
            break_duration: Duration::from_secs(60),
            enable_fallback: true,
            log_state_changes: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, failures: usize) -> Self {
        self.failure_threshold = failures;
        self
    }

    pub fn with_minimum_throughput(mut self, samples: usize) -> Self {
        self.minimum_throughput = samples;
        self
    }

    pub fn with_failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    pub fn with_sampling_duration(mut self, duration: Duration) -> Self {
        self.sampling_duration = duration;
        self
    }

    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=100.0).contains(&self.failure_rate_threshold) {
            return Err(PipelineError::config(format!(
                "failure_rate_threshold must be within 0..=100, got {}",
                self.failure_rate_threshold
            )));
        }
        if self.minimum_throughput == 0 {
            return Err(PipelineError::config("minimum_throughput must be at least 1"));
        }
        Ok(())
    }
}

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Calls reach the dependency
    Closed,
    /// Calls are rejected until the break duration elapses
    Open { since: Instant },
    /// One trial call decides whether to close again
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: &'static str,
    pub samples: usize,
    pub failures: usize,
    pub millis_in_state: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct Window {
    state: CircuitState,
    samples: VecDeque<(Instant, bool)>,
    trial_started: Option<Instant>,
    last_transition: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            samples: VecDeque::new(),
            trial_started: None,
            last_transition: Instant::now(),
        }
    }

    fn evict(&mut self, now: Instant, horizon: Duration) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.samples.iter().filter(|(_, ok)| !ok).count()
    }
}

/// Per-dependency circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            window: Mutex::new(Window::new()),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state, promoting Open to HalfOpen when the break has elapsed
    pub fn state(&self) -> CircuitState {
        let mut window = self.lock();
        self.refresh(&mut window);
        window.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut window = self.lock();
        self.refresh(&mut window);
        window.evict(Instant::now(), self.config.sampling_duration);
        CircuitSnapshot {
            dependency: self.dependency.clone(),
            state: window.state.name(),
            samples: window.samples.len(),
            failures: window.failures(),
            millis_in_state: window.last_transition.elapsed().as_millis() as u64,
        }
    }

    /// Back to Closed with an empty window
    pub fn reset(&self) {
        let mut window = self.lock();
        *window = Window::new();
        if self.config.log_state_changes {
            info!(dependency = %self.dependency, "Circuit breaker reset");
        }
    }

    /// Run `operation` through the breaker, failing fast while open
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        let admission = self.admit()?;
        let result = operation().await;

        match &result {
            Ok(_) => self.record(admission, true),
            Err(err) if err.counts_as_failure() => self.record(admission, false),
            Err(_) => self.release(admission),
        }

        result
    }

    /// Run `operation`, diverting to `fallback` while open when fallbacks are enabled
    pub async fn call_with_fallback<T, F, Fut, Fb>(
        &self,
        operation: F,
        fallback: Fb,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
        Fb: FnOnce() -> Result<T, PipelineError>,
    {
        match self.call(operation).await {
            Err(err) if err.is_circuit_open() && self.config.enable_fallback => {
                debug!(dependency = %self.dependency, "Circuit open, using fallback");
                fallback()
            }
            other => other,
        }
    }

    fn refresh(&self, window: &mut Window) {
        if let CircuitState::Open { since } = window.state {
            if since.elapsed() >= self.config.break_duration {
                self.transition(window, CircuitState::HalfOpen);
            }
        }
    }

    fn admit(&self) -> Result<Admission, PipelineError> {
        let mut window = self.lock();
        self.refresh(&mut window);

        match window.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open { .. } => {
                warn!(dependency = %self.dependency, "Circuit open, call rejected");
                Err(PipelineError::circuit_open(&self.dependency))
            }
            CircuitState::HalfOpen => {
                // A trial abandoned mid-flight frees the slot after one break duration.
                let busy = window
                    .trial_started
                    .is_some_and(|at| at.elapsed() < self.config.break_duration);
                if busy {
                    warn!(dependency = %self.dependency, "Circuit half-open, trial in flight");
                    return Err(PipelineError::circuit_open(&self.dependency));
                }
                window.trial_started = Some(Instant::now());
                Ok(Admission::Trial)
            }
        }
    }

    fn release(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.lock().trial_started = None;
        }
    }

    fn record(&self, admission: Admission, success: bool) {
        let mut window = self.lock();
        let now = Instant::now();

        if admission == Admission::Trial {
            window.trial_started = None;
            if success {
                window.samples.clear();
                self.transition(&mut window, CircuitState::Closed);
            } else {
                self.transition(&mut window, CircuitState::Open { since: now });
            }
            return;
        }

        // Calls admitted before the circuit opened do not count against it.
        if window.state != CircuitState::Closed {
            return;
        }

        window.samples.push_back((now, success));
        window.evict(now, self.config.sampling_duration);

        let samples = window.samples.len();
        let failures = window.failures();
        let rate = failures as f64 * 100.0 / samples as f64;

        if samples >= self.config.minimum_throughput
            && failures >= self.config.failure_threshold
            && rate >= self.config.failure_rate_threshold
        {
            if self.config.log_state_changes {
                warn!(
                    dependency = %self.dependency,
                    samples,
                    failures,
                    failure_rate = rate,
                    "Failure rate threshold reached"
                );
            }
            self.transition(&mut window, CircuitState::Open { since: now });
        }
    }

    fn transition(&self, window: &mut Window, next: CircuitState) {
        let previous = window.state;
        window.state = next;
        window.last_transition = Instant::now();

        if self.config.log_state_changes && previous.name() != next.name() {
            info!(
                dependency = %self.dependency,
                from = previous.name(),
                to = next.name(),
                "Circuit breaker state change"
            );
        }
    }
}

/// Process-wide breakers keyed by dependency name
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Shared breaker for `dependency`, created on first use
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}
