//! Integration tests for the resilience context
//!
//! These drive `ServiceGuard::call` the way the triage and drafting stages
//! do and check breaker, limiter, fallback and health behaviour end to end.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::test_config;
use exec_assistant::circuit_breaker::{CircuitBreaker, CircuitState};
use exec_assistant::error::{AssistantError, ErrorKind, Result};
use exec_assistant::metrics::HealthStatus;
use exec_assistant::rate_limiter::SlidingWindowLimiter;
use exec_assistant::resilience::{ResilienceContext, ServiceGuard};
use exec_assistant::retry::RetryPolicy;

fn failing(calls: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<Result<String>> {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(AssistantError::ServiceError {
            service: "gmail".to_string(),
            message: "503 service unavailable".to_string(),
        }))
    }
}

fn succeeding(calls: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<Result<String>> {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok("ok".to_string()))
    }
}

#[tokio::test]
async fn test_breaker_opens_across_calls_and_stops_invoking() {
    let mut config = test_config();
    let gmail = config.resilience.services.get_mut("gmail").unwrap();
    gmail.circuit_breaker.failure_threshold = 3;

    let context = ResilienceContext::from_config(&config);
    let guard = context.service("gmail").await;
    let calls = Arc::new(AtomicUsize::new(0));

    // gmail makes three attempts per call; the third failure opens the breaker
    let result = guard.call(None, failing(&calls)).await;
    assert!(matches!(result, Err(AssistantError::ServiceError { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(guard.breaker().state().await, CircuitState::Open);

    let result = guard.call(None, failing(&calls)).await;
    assert!(matches!(
        result,
        Err(AssistantError::CircuitBreakerOpen { ref service, .. }) if service == "gmail"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = context.breaker_stats().await;
    assert_eq!(stats["gmail"].state, CircuitState::Open);
    assert_eq!(stats["llm"].state, CircuitState::Closed);
}

#[tokio::test]
async fn test_breaker_recovers_after_timeout() {
    let context = ResilienceContext::default();
    let guard = context
        .register(ServiceGuard::from_parts(
            "calendar",
            RetryPolicy::no_retry(),
            CircuitBreaker::with_settings("calendar", 2, Duration::from_millis(50)),
            None,
            Arc::clone(context.metrics()),
        ))
        .await;
    let calls = Arc::new(AtomicUsize::new(0));

    let _ = guard.call(None, failing(&calls)).await;
    let _ = guard.call(None, failing(&calls)).await;
    assert_eq!(guard.breaker().state().await, CircuitState::Open);
    assert!(guard.call(None, succeeding(&calls)).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = guard.call(None, succeeding(&calls)).await;
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(guard.breaker().state().await, CircuitState::Closed);
    assert_eq!(guard.breaker().stats().await.failure_count, 0);
}

#[tokio::test]
async fn test_rate_limited_guard_falls_back() {
    let context = ResilienceContext::default();
    let guard = context
        .register(ServiceGuard::from_parts(
            "llm",
            RetryPolicy::no_retry(),
            CircuitBreaker::with_settings("llm", 5, Duration::from_secs(60)),
            Some(SlidingWindowLimiter::per_minute("llm", 2)),
            Arc::clone(context.metrics()),
        ))
        .await;
    let calls = Arc::new(AtomicUsize::new(0));

    assert!(guard.call(None, succeeding(&calls)).await.is_ok());
    assert!(guard.call(None, succeeding(&calls)).await.is_ok());

    let rejected = guard.call(None, succeeding(&calls)).await;
    assert!(matches!(rejected, Err(AssistantError::RateLimited { limit: 2, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let fallback = guard
        .call_or_else(None, succeeding(&calls), || async {
            Ok("cached".to_string())
        })
        .await;
    assert_eq!(fallback.unwrap(), "cached");

    // rejections never reach the breaker
    assert_eq!(guard.breaker().state().await, CircuitState::Closed);
    assert_eq!(guard.breaker().stats().await.failure_count, 0);
}

#[tokio::test]
async fn test_timeout_aborts_retry_sequence() {
    let config = test_config();
    let context = ResilienceContext::from_config(&config);
    let guard = context.service("llm").await;

    let result: Result<String> = guard
        .call(Some(Duration::from_millis(20)), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        })
        .await;

    assert!(matches!(result, Err(AssistantError::Timeout(_))));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);

    let summary = context.metrics().summary("llm").await.unwrap();
    assert_eq!(summary.failed_requests, 1);
    assert_eq!(summary.error_breakdown.get("timeout"), Some(&1));
    assert_eq!(guard.breaker().stats().await.failure_count, 1);
}

#[tokio::test]
async fn test_unknown_service_uses_default_profile() {
    let mut config = test_config();
    config.resilience.default.retry.max_attempts = 4;
    let context = ResilienceContext::from_config(&config);

    let guard = context.service("crm").await;
    assert_eq!(guard.policy().max_attempts, 4);

    let calls = Arc::new(AtomicUsize::new(0));
    let _ = guard.call(None, failing(&calls)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(Arc::ptr_eq(&guard, &context.service("crm").await));
}

#[tokio::test]
async fn test_health_reflects_failures() {
    let config = test_config();
    let context = ResilienceContext::from_config(&config);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(context.health().await.status, HealthStatus::Healthy);

    let llm = context.service("llm").await;
    for _ in 0..4 {
        let _ = llm.call(None, succeeding(&calls)).await;
    }
    let _ = llm.call(None, failing(&calls)).await;

    let summary = context.metrics().summary("llm").await.unwrap();
    assert_eq!(summary.total_requests, 6);
    assert_eq!(summary.successful_requests, 4);
    assert_eq!(summary.error_breakdown.get("generic"), Some(&2));

    let health = context.health().await;
    assert_ne!(health.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_concurrent_calls_share_guard() {
    let config = test_config();
    let context = Arc::new(ResilienceContext::from_config(&config));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let context = Arc::clone(&context);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            let guard = context.service("calendar").await;
            guard.call(None, succeeding(&calls)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 10);
    let summary = context.metrics().summary("calendar").await.unwrap();
    assert_eq!(summary.total_requests, 10);
}
