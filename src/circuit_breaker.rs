//! Per-dependency circuit breaker
//!
//! Tracks consecutive failures against one named dependency ("llm", "gmail",
//! "calendar", ...) and temporarily rejects calls once a failure threshold is
//! reached.
//!
//! # Circuit States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Threshold reached, calls are rejected until the recovery timeout elapses
//! - **HalfOpen**: Recovery trial, exactly one call is admitted to probe the dependency
//!
//! # Usage
//!
//! ```no_run
//! use exec_assistant::circuit_breaker::CircuitBreaker;
//! use exec_assistant::config::CircuitBreakerConfig;
//! use exec_assistant::error::{AssistantError, Result};
//!
//! # async fn example() -> Result<()> {
//! let breaker = CircuitBreaker::new("llm", &CircuitBreakerConfig::default());
//!
//! // Check if the call should be admitted
//! breaker.check_request().await?;
//!
//! // Make the remote call here...
//! let result: Result<()> = Ok(());
//!
//! // Record the outcome
//! match result {
//!     Ok(_) => breaker.record_success().await,
//!     Err(_) => breaker.record_failure().await,
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{AssistantError, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Circuit is open - calls are rejected
    Open,
    /// Testing recovery - one trial call allowed
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

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Set while the half-open trial call is outstanding
    trial_started: Option<Instant>,
    service: String,
    enabled: bool,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreakerState {
    fn should_allow_request(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let Some(last_failure) = self.last_failure else {
                    warn!(
                        service = %self.service,
                        "Circuit breaker open without a recorded failure, closing"
                    );
                    self.close();
                    return Ok(());
                };

                let elapsed = last_failure.elapsed();
                if elapsed > self.recovery_timeout {
                    debug!(
                        service = %self.service,
                        "Circuit breaker transitioning to half-open after {:?}",
                        elapsed
                    );
                    self.state = CircuitState::HalfOpen;
                    self.trial_started = Some(Instant::now());
                    Ok(())
                } else {
                    Err(self.rejection(self.recovery_timeout.saturating_sub(elapsed)))
                }
            }
            CircuitState::HalfOpen => {
                // A trial that never reported back is abandoned after one recovery period
                let in_flight = self.trial_started.map(|started| started.elapsed());
                match in_flight {
                    Some(elapsed) if elapsed <= self.recovery_timeout => {
                        Err(self.rejection(self.recovery_timeout.saturating_sub(elapsed)))
                    }
                    _ => {
                        self.trial_started = Some(Instant::now());
                        Ok(())
                    }
                }
            }
        }
    }

    fn rejection(&self, remaining: Duration) -> AssistantError {
        let mut retry_after_secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            retry_after_secs += 1;
        }
        AssistantError::CircuitBreakerOpen {
            service: self.service.clone(),
            retry_after_secs,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.trial_started = None;
    }

    fn record_success(&mut self) {
        if !self.enabled {
            return;
        }

        match self.state {
            CircuitState::Closed => {
                if self.failure_count > 0 {
                    debug!(
                        service = %self.service,
                        "Circuit breaker: resetting failure count after success"
                    );
                    self.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    service = %self.service,
                    "Circuit breaker: trial call succeeded, closing circuit"
                );
                self.close();
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(
                    service = %self.service,
                    "Circuit breaker: late success while open, ignoring"
                );
            }
        }
    }

    fn record_failure(&mut self) {
        if !self.enabled {
            return;
        }

        self.last_failure = Some(Instant::now());

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                debug!(
                    service = %self.service,
                    "Circuit breaker: failure {}/{} in closed state",
                    self.failure_count,
                    self.failure_threshold
                );

                if self.failure_count >= self.failure_threshold {
                    warn!(
                        service = %self.service,
                        "Circuit breaker: threshold reached ({} failures), opening circuit for {:?}",
                        self.failure_count,
                        self.recovery_timeout
                    );
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    service = %self.service,
                    "Circuit breaker: trial call failed, reopening circuit"
                );
                self.failure_count += 1;
                self.state = CircuitState::Open;
                self.trial_started = None;
            }
            CircuitState::Open => {
                debug!(
                    service = %self.service,
                    "Circuit breaker: failure recorded while circuit is already open"
                );
            }
        }
    }
}

/// Circuit breaker shared by every in-flight call against one dependency
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a breaker for `service` from its configuration section
    pub fn new(service: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::build(
            service.into(),
            config.enabled,
            config.failure_threshold,
            Duration::from_secs(config.recovery_timeout_secs),
        )
    }

    /// Create an enabled breaker with an explicit threshold and recovery timeout
    pub fn with_settings(
        service: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self::build(service.into(), true, failure_threshold, recovery_timeout)
    }

    fn build(
        service: String,
        enabled: bool,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_started: None,
                service,
                enabled,
                failure_threshold: failure_threshold.max(1),
                recovery_timeout,
            })),
        }
    }

    /// Check if a call should be admitted through the circuit breaker
    pub async fn check_request(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.should_allow_request()
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.record_success();
    }

    /// Record a failed call. Every failure counts, including timeouts.
    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.record_failure();
    }

    /// Get the current circuit state
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Reset the circuit breaker to closed state
    ///
    /// This is useful for testing or manual intervention
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.close();
        state.last_failure = None;
        debug!(service = %state.service, "Circuit breaker manually reset to closed state");
    }

    /// Get circuit breaker statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        CircuitBreakerStats {
            service: state.service.clone(),
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: state.failure_threshold,
            last_failure: state.last_failure,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure: Option<Instant>,
}
