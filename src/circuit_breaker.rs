use crate::error::{Result, TabError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit fails fast before admitting a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// How a completed call counts against the breaker.
///
/// Fatal failures mean the upstream answered (a 4xx is not an outage), so
/// they release a half-open trial without moving the failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// Admission permit handed out by [`CircuitBreaker::acquire`]. Each permit
/// must be consumed by exactly one `record_outcome` call.
///
/// The permit remembers whether its call is the half-open trial. Calls
/// admitted before the circuit opened can report arbitrarily late, and those
/// reports must not release the trial guard or drive half-open transitions.
#[derive(Debug)]
#[must_use = "every permit must be consumed by record_outcome"]
pub struct BreakerPermit {
    trial: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-upstream circuit breaker.
///
/// Admission (`acquire`) and the half-open trial flag are decided under a
/// single lock, so at most one trial call can be in flight. Only the trial's
/// own permit may release that flag or move the circuit out of HALF_OPEN.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask for admission. Fails fast with [`TabError::CircuitOpen`] while the
    /// circuit is open or a half-open trial is already in flight.
    pub async fn acquire(&self) -> Result<BreakerPermit> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(BreakerPermit { trial: false }),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);

                if elapsed >= self.config.recovery_timeout {
                    info!("Circuit '{}' transitioning OPEN -> HALF_OPEN", self.name);
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(BreakerPermit { trial: true })
                } else {
                    Err(TabError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: self.config.recovery_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(TabError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: Duration::ZERO,
                    })
                } else {
                    state.trial_in_flight = true;
                    Ok(BreakerPermit { trial: true })
                }
            }
        }
    }

    /// Consume a permit with the outcome of its call.
    pub async fn record_outcome(&self, permit: BreakerPermit, outcome: RequestOutcome) {
        let mut state = self.state.lock().await;

        // Only the trial's own report releases the trial slot
        if permit.trial {
            state.trial_in_flight = false;
        }

        match outcome {
            RequestOutcome::Success => match state.state {
                CircuitState::Closed => {
                    state.consecutive_failures = 0;
                }
                CircuitState::HalfOpen if permit.trial => {
                    info!("Circuit '{}' transitioning HALF_OPEN -> CLOSED", self.name);
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.opened_at = None;
                }
                // Late report from a call admitted before the circuit opened
                _ => {}
            },
            RequestOutcome::RetryableFailure => match state.state {
                CircuitState::HalfOpen if permit.trial => {
                    warn!(
                        "Circuit '{}' trial failed, transitioning HALF_OPEN -> OPEN",
                        self.name
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
                CircuitState::Closed => {
                    state.consecutive_failures += 1;
                    warn!(
                        "Circuit '{}' failure {}/{}",
                        self.name, state.consecutive_failures, self.config.failure_threshold
                    );
                    if state.consecutive_failures >= self.config.failure_threshold {
                        warn!("Circuit '{}' transitioning CLOSED -> OPEN", self.name);
                        state.state = CircuitState::Open;
                        state.opened_at = Some(Instant::now());
                    }
                }
                // Late report while OPEN, or a non-trial report during the
                // half-open window
                _ => {}
            },
            // Upstream answered; only the trial slot is released
            RequestOutcome::FatalFailure => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn stats(&self) -> CircuitStats {
        let state = self.state.lock().await;
        let time_until_retry = match state.state {
            CircuitState::Open => state.opened_at.map(|at| {
                self.config
                    .recovery_timeout
                    .saturating_sub(at.elapsed())
                    .as_secs_f64()
            }),
            _ => None,
        };

        CircuitStats {
            name: self.name.clone(),
            state: state.state.as_str(),
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs_f64(),
            time_until_retry_secs: time_until_retry,
        }
    }

    /// Manually force the circuit back to CLOSED.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        info!("Manually resetting circuit '{}' to CLOSED", self.name);
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub time_until_retry_secs: Option<f64>,
}

/// Get-or-create registry of breakers keyed by upstream-service name.
///
/// Granularity is per logical upstream (e.g. `tabcorp-api`, `tabcorp-oauth`),
/// never per endpoint, so one failing endpoint trips the whole service it
/// belongs to and nothing else.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry pre-seeded with breakers, so construction does not
    /// need an async context.
    pub fn with_breakers(
        default_config: CircuitBreakerConfig,
        breakers: Vec<Arc<CircuitBreaker>>,
    ) -> Self {
        let map = breakers
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker))
            .collect();
        Self {
            default_config,
            breakers: Mutex::new(map),
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    pub async fn stats(&self, name: &str) -> Option<CircuitStats> {
        let breaker = {
            let breakers = self.breakers.lock().await;
            breakers.get(name).cloned()
        };
        match breaker {
            Some(breaker) => Some(breaker.stats().await),
            None => None,
        }
    }

    pub async fn all_stats(&self) -> Vec<CircuitStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let breakers = self.breakers.lock().await;
            breakers.values().cloned().collect()
        };
        let mut stats = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            stats.push(breaker.stats().await);
        }
        stats
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let breakers = self.breakers.lock().await;
            breakers.values().cloned().collect()
        };
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
