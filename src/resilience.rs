//! Resilience context shared by every component that talks to a dependency
//!
//! The runtime builds one `ResilienceContext` from configuration and hands it
//! to each component. It owns one `ServiceGuard` per dependency name (policy,
//! breaker and optional limiter) and the metrics registry all guards report to.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::config::{Config, ResilienceConfig, ServiceConfig};
use crate::error::{AssistantError, ErrorKind, Result};
use crate::metrics::{HealthReport, MetricsRegistry, DEFAULT_WINDOW_SIZE};
use crate::rate_limiter::SlidingWindowLimiter;
use crate::retry::{self, RetryPolicy};

/// Retry policy, breaker and limiter for one named dependency
#[derive(Debug)]
pub struct ServiceGuard {
    name: String,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    limiter: Option<SlidingWindowLimiter>,
    metrics: Arc<MetricsRegistry>,
}

impl ServiceGuard {
    pub fn new(name: &str, config: &ServiceConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            name: name.to_string(),
            policy: RetryPolicy::from(&config.retry),
            breaker: CircuitBreaker::new(name, &config.circuit_breaker),
            limiter: config
                .rate_limit_per_minute
                .map(|limit| SlidingWindowLimiter::per_minute(name, limit)),
            metrics,
        }
    }

    /// Assemble a guard from already built parts
    pub fn from_parts(
        name: &str,
        policy: RetryPolicy,
        breaker: CircuitBreaker,
        limiter: Option<SlidingWindowLimiter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            policy,
            breaker,
            limiter,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> Option<&SlidingWindowLimiter> {
        self.limiter.as_ref()
    }

    /// Run `operation` through the retry policy, breaker and limiter.
    ///
    /// Each executed attempt is timed and recorded in the metrics registry.
    /// `timeout` bounds the whole sequence, backoff sleeps included; when it
    /// elapses the breaker and metrics both record a failure.
    pub async fn call<T, F, Fut>(&self, timeout: Option<Duration>, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let metrics = &self.metrics;
        let name = self.name.as_str();

        let attempt = move || {
            let future = operation();
            async move {
                let started = Instant::now();
                let result = future.await;
                let error = result.as_ref().err().map(AssistantError::kind);
                metrics.record(name, started.elapsed(), error).await;
                result
            }
        };

        let sequence = retry::execute(
            name,
            &self.policy,
            &self.breaker,
            self.limiter.as_ref(),
            attempt,
        );

        let Some(limit) = timeout else {
            return sequence.await;
        };

        match tokio::time::timeout(limit, sequence).await {
            Ok(result) => result,
            Err(_) => {
                warn!(service = name, "Call timed out after {:?}", limit);
                self.breaker.record_failure().await;
                self.metrics
                    .record(name, limit, Some(ErrorKind::Timeout))
                    .await;
                Err(AssistantError::Timeout(limit))
            }
        }
    }

    /// Like [`ServiceGuard::call`], with `fallback` run once the call fails
    pub async fn call_or_else<T, F, Fut, G, GFut>(
        &self,
        timeout: Option<Duration>,
        operation: F,
        fallback: G,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        let outcome = self.call(timeout, operation).await;
        retry::recover(&self.name, outcome, fallback).await
    }
}

/// Explicitly constructed registry of per-dependency guards plus shared metrics
pub struct ResilienceContext {
    config: ResilienceConfig,
    guards: RwLock<HashMap<String, Arc<ServiceGuard>>>,
    metrics: Arc<MetricsRegistry>,
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new(ResilienceConfig::default(), DEFAULT_WINDOW_SIZE)
    }
}

impl ResilienceContext {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.resilience.clone(), config.metrics.window_size)
    }

    pub fn new(config: ResilienceConfig, window_size: usize) -> Self {
        let metrics = Arc::new(MetricsRegistry::new(window_size));
        let guards = config
            .services
            .iter()
            .map(|(name, service)| {
                let guard = ServiceGuard::new(name, service, Arc::clone(&metrics));
                (name.clone(), Arc::new(guard))
            })
            .collect();

        Self {
            config,
            guards: RwLock::new(guards),
            metrics,
        }
    }

    /// Guard for `name`, created from the default profile on first use
    pub async fn service(&self, name: &str) -> Arc<ServiceGuard> {
        if let Some(guard) = self.guards.read().await.get(name) {
            return Arc::clone(guard);
        }

        let mut guards = self.guards.write().await;
        let guard = guards.entry(name.to_string()).or_insert_with(|| {
            debug!(service = name, "Creating guard from default resilience profile");
            Arc::new(ServiceGuard::new(
                name,
                self.config.service(name),
                Arc::clone(&self.metrics),
            ))
        });
        Arc::clone(guard)
    }

    /// Install a guard, replacing any existing one with the same name
    pub async fn register(&self, guard: ServiceGuard) -> Arc<ServiceGuard> {
        let guard = Arc::new(guard);
        self.guards
            .write()
            .await
            .insert(guard.name().to_string(), Arc::clone(&guard));
        guard
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub async fn health(&self) -> HealthReport {
        self.metrics.health().await
    }

    /// Snapshot of every breaker currently known, keyed by service name
    pub async fn breaker_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        let guards: Vec<Arc<ServiceGuard>> = self.guards.read().await.values().cloned().collect();

        let mut stats = BTreeMap::new();
        for guard in guards {
            stats.insert(guard.name().to_string(), guard.breaker().stats().await);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::config::{CircuitBreakerConfig, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_service(max_attempts: u32, threshold: u32, limit: Option<u32>) -> ServiceConfig {
        ServiceConfig {
            retry: RetryConfig {
                max_attempts,
                base_delay_secs: 0.001,
                max_delay_secs: 0.005,
                exponential_base: 2.0,
                jitter: false,
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                recovery_timeout_secs: 60,
            },
            rate_limit_per_minute: limit,
        }
    }

    fn context_with(name: &str, service: ServiceConfig) -> ResilienceContext {
        let mut config = ResilienceConfig::default();
        config.services.insert(name.to_string(), service);
        ResilienceContext::new(config, 100)
    }

    #[tokio::test]
    async fn test_same_guard_for_same_name() {
        let context = ResilienceContext::default();

        let first = context.service("llm").await;
        let second = context.service("llm").await;
        assert!(Arc::ptr_eq(&first, &second));

        let unknown = context.service("crm").await;
        assert_eq!(unknown.name(), "crm");
        assert_eq!(
            unknown.policy(),
            &RetryPolicy::from(&ResilienceConfig::default().default.retry)
        );
    }

    #[tokio::test]
    async fn test_preconfigured_services_use_their_profiles() {
        let context = ResilienceContext::default();

        assert_eq!(context.service("llm").await.policy().max_attempts, 2);
        assert_eq!(context.service("gmail").await.policy().max_attempts, 3);
        assert_eq!(
            context.service("calendar").await.policy().base_delay,
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn test_call_records_each_attempt() {
        let context = context_with("llm", fast_service(3, 10, None));
        let guard = context.service("llm").await;
        let calls = AtomicU32::new(0);

        let result = guard
            .call(None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AssistantError::RateLimitExceeded { retry_after: 1 })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let summary = context.metrics().summary("llm").await.unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.failed_requests, 2);
        assert_eq!(summary.error_breakdown.get("rate_limit"), Some(&2));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let context = context_with("llm", fast_service(1, 1, None));
        let guard = context.service("llm").await;

        let result: Result<()> = guard
            .call(Some(Duration::from_millis(20)), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AssistantError::Timeout(_))));
        assert_eq!(guard.breaker().state().await, CircuitState::Open);

        let summary = context.metrics().summary("llm").await.unwrap();
        assert_eq!(summary.error_breakdown.get("timeout"), Some(&1));
    }

    #[tokio::test]
    async fn test_rejections_are_not_recorded_in_metrics() {
        let context = context_with("gmail", fast_service(1, 5, Some(1)));
        let guard = context.service("gmail").await;

        let first = guard.call(None, || async { Ok(()) }).await;
        assert!(first.is_ok());
        let second = guard.call(None, || async { Ok(()) }).await;
        assert!(matches!(second, Err(AssistantError::RateLimited { .. })));

        let summary = context.metrics().summary("gmail").await.unwrap();
        assert_eq!(summary.total_requests, 1);
    }

    #[tokio::test]
    async fn test_call_or_else_uses_fallback() {
        let context = context_with("calendar", fast_service(2, 10, None));
        let guard = context.service("calendar").await;

        let result = guard
            .call_or_else(
                None,
                || async { Err(AssistantError::NetworkError("reset".to_string())) },
                || async { Ok("fallback") },
            )
            .await;

        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_breaker_shared_across_tasks() {
        let context = Arc::new(context_with("llm", fast_service(1, 3, None)));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let context = Arc::clone(&context);
            handles.push(tokio::spawn(async move {
                let guard = context.service("llm").await;
                guard
                    .call(None, || async {
                        Err::<(), _>(AssistantError::ModelError("down".to_string()))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        let stats = context.breaker_stats().await;
        assert_eq!(stats["llm"].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_register_replaces_guard() {
        let context = ResilienceContext::default();
        let metrics = Arc::clone(context.metrics());
        let breaker = CircuitBreaker::with_settings("llm", 1, Duration::from_millis(10));

        context
            .register(ServiceGuard::from_parts(
                "llm",
                RetryPolicy::no_retry(),
                breaker,
                None,
                metrics,
            ))
            .await;

        assert_eq!(context.service("llm").await.policy().max_attempts, 1);
    }
}
