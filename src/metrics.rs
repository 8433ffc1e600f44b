//! Operation metrics and derived health status
//!
//! Every remote call records its outcome, duration and (on failure) an error
//! kind against its operation type and against the `"overall"` aggregate.
//! Latency averages use a bounded window of the most recent durations; the
//! request and error counters run until an explicit reset.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ErrorKind, Result};

/// Aggregate operation type every record also lands in
pub const OVERALL: &str = "overall";

/// Default capacity of the latency window
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct OperationMetrics {
    window_size: usize,
    durations: VecDeque<Duration>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    min_duration: Option<Duration>,
    max_duration: Option<Duration>,
    error_counts: BTreeMap<String, u64>,
    last_reset: DateTime<Utc>,
}

impl OperationMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            durations: VecDeque::new(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            min_duration: None,
            max_duration: None,
            error_counts: BTreeMap::new(),
            last_reset: Utc::now(),
        }
    }

    pub fn record(&mut self, duration: Duration, error: Option<ErrorKind>) {
        self.total_requests += 1;

        match error {
            None => self.successful_requests += 1,
            Some(kind) => {
                self.failed_requests += 1;
                *self.error_counts.entry(kind.as_str().to_string()).or_insert(0) += 1;
            }
        }

        if self.durations.len() == self.window_size {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);

        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
    }

    /// Success rate in percent, or `None` before the first request
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_requests == 0 {
            None
        } else {
            Some(self.successful_requests as f64 / self.total_requests as f64 * 100.0)
        }
    }

    /// Mean over the latency window
    pub fn average_duration(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.durations.iter().sum();
        total / self.durations.len() as u32
    }

    pub fn window_len(&self) -> usize {
        self.durations.len()
    }

    pub fn summary(&self, operation: &str) -> MetricsSummary {
        MetricsSummary {
            operation_type: operation.to_string(),
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            success_rate_percent: round_to(self.success_rate().unwrap_or(0.0), 2),
            average_response_time_ms: millis(self.average_duration()),
            min_response_time_ms: self.min_duration.map(millis).unwrap_or(0.0),
            max_response_time_ms: self.max_duration.map(millis).unwrap_or(0.0),
            error_breakdown: self.error_counts.clone(),
            last_reset: self.last_reset,
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn millis(duration: Duration) -> f64 {
    round_to(duration.as_secs_f64() * 1000.0, 2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub operation_type: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate_percent: f64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub error_breakdown: BTreeMap<String, u64>,
    pub last_reset: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Healthy
        } else if score >= 70.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub health_score: f64,
    pub total_requests: u64,
    pub success_rate_percent: f64,
    pub average_response_time_seconds: f64,
    pub active_errors: u64,
    pub since: DateTime<Utc>,
}

/// Score out of 100 from the aggregate success rate (percent) and average latency
pub fn health_score(success_rate: f64, average_latency: Duration) -> f64 {
    let mut score = 100.0;
    if success_rate < 95.0 {
        score -= (95.0 - success_rate) * 2.0;
    }
    let avg_secs = average_latency.as_secs_f64();
    if avg_secs > 5.0 {
        score -= ((avg_secs - 5.0) * 10.0).min(50.0);
    }
    f64::max(score, 0.0)
}

/// Shared metrics registry, one instance per runtime
#[derive(Debug)]
pub struct MetricsRegistry {
    window_size: usize,
    operations: Mutex<HashMap<String, OperationMetrics>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl MetricsRegistry {
    pub fn new(window_size: usize) -> Self {
        let mut operations = HashMap::new();
        operations.insert(OVERALL.to_string(), OperationMetrics::new(window_size));
        Self {
            window_size,
            operations: Mutex::new(operations),
        }
    }

    /// Record one completed call against `operation` and the aggregate
    pub async fn record(&self, operation: &str, duration: Duration, error: Option<ErrorKind>) {
        let mut operations = self.operations.lock().await;

        if operation != OVERALL {
            operations
                .entry(operation.to_string())
                .or_insert_with(|| OperationMetrics::new(self.window_size))
                .record(duration, error);
        }
        operations
            .entry(OVERALL.to_string())
            .or_insert_with(|| OperationMetrics::new(self.window_size))
            .record(duration, error);

        debug!(
            operation,
            success = error.is_none(),
            "Operation completed in {:.3}s",
            duration.as_secs_f64()
        );
    }

    /// Await `future`, recording its duration and outcome under `operation`
    pub async fn track<T, Fut>(&self, operation: &str, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = future.await;
        let error = result.as_ref().err().map(|e| e.kind());
        self.record(operation, started.elapsed(), error).await;
        result
    }

    pub async fn summary(&self, operation: &str) -> Option<MetricsSummary> {
        let operations = self.operations.lock().await;
        operations.get(operation).map(|m| m.summary(operation))
    }

    pub async fn summaries(&self) -> BTreeMap<String, MetricsSummary> {
        let operations = self.operations.lock().await;
        operations
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.summary(name)))
            .collect()
    }

    pub async fn health(&self) -> HealthReport {
        let operations = self.operations.lock().await;
        let fresh = OperationMetrics::new(self.window_size);
        let overall = operations.get(OVERALL).unwrap_or(&fresh);

        let success_rate = overall.success_rate().unwrap_or(100.0);
        let average = overall.average_duration();
        let score = health_score(success_rate, average);

        HealthReport {
            status: HealthStatus::from_score(score),
            health_score: round_to(score, 1),
            total_requests: overall.total_requests,
            success_rate_percent: round_to(success_rate, 2),
            average_response_time_seconds: round_to(average.as_secs_f64(), 3),
            active_errors: overall.error_counts.values().sum(),
            since: overall.last_reset,
        }
    }

    /// Reset one operation, or every operation (aggregate included) when `None`
    pub async fn reset(&self, operation: Option<&str>) {
        let mut operations = self.operations.lock().await;
        match operation {
            Some(name) => {
                if let Some(metrics) = operations.get_mut(name) {
                    *metrics = OperationMetrics::new(self.window_size);
                }
            }
            None => {
                for metrics in operations.values_mut() {
                    *metrics = OperationMetrics::new(self.window_size);
                }
            }
        }
        info!("Reset metrics for {}", operation.unwrap_or("all operations"));
    }
}
