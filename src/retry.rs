//! Retry with exponential backoff around remote calls
//!
//! `execute` and `execute_or_else` wrap an async operation with a retry policy,
//! a circuit breaker and an optional rate limiter. The wrapped call keeps the
//! operation's own input/output contract, so wrappers compose like ordinary
//! functions.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::RetryConfig;
use crate::error::{AssistantError, Result};
use crate::rate_limiter::SlidingWindowLimiter;

/// Immutable retry configuration, shared by reference
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: secs(config.base_delay_secs),
            max_delay: secs(config.max_delay_secs),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl RetryPolicy {
    /// Policy that runs the operation once with no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    /// Unjittered delay after the failed attempt `attempt` (zero based):
    /// `min(base_delay * exponential_base^attempt, max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        secs(capped).min(self.max_delay)
    }

    /// Delay actually slept, scaled into `[0.5, 1.0]` of the base delay when jitter is on
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// Run `operation` under the policy, breaker and limiter.
///
/// Per attempt: the limiter admits first, then the breaker; a rejection from
/// either ends the sequence at once without sleeping. A failed attempt is
/// recorded against the breaker and followed by a backoff sleep unless it was
/// the last one. Returns the last observed failure when every attempt fails.
pub async fn execute<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    limiter: Option<&SlidingWindowLimiter>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<AssistantError> = None;

    for attempt in 0..max_attempts {
        if let Err(e) = admit(breaker, limiter).await {
            if e.is_rejection() {
                warn!("{} rejected: {}", operation_name, e);
            }
            return Err(e);
        }

        match operation().await {
            Ok(value) => {
                breaker.record_success().await;
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                breaker.record_failure().await;

                if attempt + 1 >= max_attempts {
                    error!(
                        "{} failed after {} attempts: {}",
                        operation_name, max_attempts, e
                    );
                    last_error = Some(e);
                    break;
                }

                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        AssistantError::ServiceError {
            service: operation_name.to_string(),
            message: "no attempt was made".to_string(),
        }
    }))
}

/// Limiter first, then breaker
async fn admit(breaker: &CircuitBreaker, limiter: Option<&SlidingWindowLimiter>) -> Result<()> {
    if let Some(limiter) = limiter {
        limiter.try_acquire().await?;
    }
    breaker.check_request().await
}

/// Like [`execute`], but runs `fallback` once the sequence fails (retries
/// exhausted or the call was rejected).
///
/// A fallback success is returned. A fallback failure is logged and the
/// original failure is returned instead.
pub async fn execute_or_else<T, F, Fut, G, GFut>(
    operation_name: &str,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    limiter: Option<&SlidingWindowLimiter>,
    operation: F,
    fallback: G,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = Result<T>>,
{
    let outcome = execute(operation_name, policy, breaker, limiter, operation).await;
    recover(operation_name, outcome, fallback).await
}

/// Replace a failed outcome with the fallback's result, keeping the original
/// failure when the fallback fails too
pub async fn recover<T, G, GFut>(operation_name: &str, outcome: Result<T>, fallback: G) -> Result<T>
where
    G: FnOnce() -> GFut,
    GFut: Future<Output = Result<T>>,
{
    match outcome {
        Ok(value) => Ok(value),
        Err(original) => {
            if original.is_rejection() {
                debug!("{} refused, using fallback: {}", operation_name, original);
            } else {
                debug!("{} failed, using fallback: {}", operation_name, original);
            }
            match fallback().await {
                Ok(value) => Ok(value),
                Err(fallback_error) => {
                    error!("{} fallback failed: {}", operation_name, fallback_error);
                    Err(original)
                }
            }
        }
    }
}
