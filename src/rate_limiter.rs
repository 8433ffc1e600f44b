//! Sliding-window rate limiter for outbound dependency calls
//!
//! Each named dependency may cap how many calls it admits per window
//! (one minute by default). The limiter keeps the admission instants of the
//! current window:
//! - Timestamps older than the window are evicted on every check
//! - A call is admitted while fewer than `limit` timestamps remain
//! - Calls beyond the cap are rejected outright, never queued or delayed

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{AssistantError, Result};

/// Default window used for per-minute limits
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter shared by every call against one dependency
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    inner: Arc<Mutex<LimiterState>>,
}

#[derive(Debug)]
struct LimiterState {
    service: String,
    /// Maximum admissions within one window
    limit: u32,
    window: Duration,
    /// Admission instants inside the current window, oldest first
    admitted: VecDeque<Instant>,
    total_admitted: u64,
    total_rejected: u64,
}

impl LimiterState {
    fn evict_expired(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.duration_since(*oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `limit` calls per minute
    pub fn per_minute(service: impl Into<String>, limit: u32) -> Self {
        Self::with_window(service, limit, DEFAULT_WINDOW)
    }

    /// Create a limiter with a custom window length
    pub fn with_window(service: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState {
                service: service.into(),
                limit,
                window,
                admitted: VecDeque::new(),
                total_admitted: 0,
                total_rejected: 0,
            })),
        }
    }

    /// Try to admit one call without waiting
    ///
    /// Returns `RateLimited` when the window is already full.
    pub async fn try_acquire(&self) -> Result<()> {
        let mut state = self.inner.lock().await;

        let now = Instant::now();
        state.evict_expired(now);

        trace!(
            service = %state.service,
            "Rate window: {}/{} calls admitted",
            state.admitted.len(),
            state.limit
        );

        if state.admitted.len() < state.limit as usize {
            state.admitted.push_back(now);
            state.total_admitted += 1;
            Ok(())
        } else {
            state.total_rejected += 1;
            debug!(
                service = %state.service,
                "Rate limit of {} calls per {:?} reached, rejecting call",
                state.limit,
                state.window
            );
            Err(AssistantError::RateLimited {
                service: state.service.clone(),
                limit: state.limit,
            })
        }
    }

    /// Calls still admissible in the current window
    pub async fn available(&self) -> u32 {
        let mut state = self.inner.lock().await;
        state.evict_expired(Instant::now());
        state.limit.saturating_sub(state.admitted.len() as u32)
    }

    /// Get current statistics about limiter usage
    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.inner.lock().await;
        state.evict_expired(Instant::now());
        RateLimiterStats {
            service: state.service.clone(),
            limit: state.limit,
            window: state.window,
            in_window: state.admitted.len() as u32,
            total_admitted: state.total_admitted,
            total_rejected: state.total_rejected,
        }
    }
}

impl Clone for SlidingWindowLimiter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Statistics about limiter usage
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub service: String,
    /// Maximum admissions per window
    pub limit: u32,
    pub window: Duration,
    /// Admissions currently counted against the window
    pub in_window: u32,
    /// Total calls admitted since creation
    pub total_admitted: u64,
    /// Total calls rejected since creation
    pub total_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admits_up_to_limit() {
        let limiter = SlidingWindowLimiter::per_minute("llm", 3);

        for _ in 0..3 {
            assert!(limiter.try_acquire().await.is_ok());
        }

        let result = limiter.try_acquire().await;
        assert!(matches!(
            result,
            Err(AssistantError::RateLimited { ref service, limit: 3 }) if service == "llm"
        ));
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_everything() {
        let limiter = SlidingWindowLimiter::per_minute("gmail", 0);
        assert!(limiter.try_acquire().await.is_err());
        assert_eq!(limiter.available().await, 0);
    }

    #[tokio::test]
    async fn test_huge_limit_admits_without_preallocating() {
        let limiter = SlidingWindowLimiter::per_minute("llm", u32::MAX);
        assert!(limiter.try_acquire().await.is_ok());
        assert_eq!(limiter.available().await, u32::MAX - 1);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = SlidingWindowLimiter::with_window("llm", 2, Duration::from_millis(50));

        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(limiter.available().await, 2);
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_stats() {
        let limiter = SlidingWindowLimiter::per_minute("calendar", 1);

        let _ = limiter.try_acquire().await;
        let _ = limiter.try_acquire().await;
        let _ = limiter.try_acquire().await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_admitted, 1);
        assert_eq!(stats.total_rejected, 2);
        assert_eq!(stats.in_window, 1);
        assert_eq!(stats.limit, 1);
        assert_eq!(stats.window, DEFAULT_WINDOW);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let limiter1 = SlidingWindowLimiter::per_minute("llm", 5);
        let limiter2 = limiter1.clone();

        let _ = limiter1.try_acquire().await;

        let stats = limiter2.stats().await;
        assert_eq!(stats.total_admitted, 1);
        assert_eq!(limiter2.available().await, 4);
    }
}
