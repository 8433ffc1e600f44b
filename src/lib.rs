//! Executive Assistant Engine
//!
//! Decides what to do with each incoming email on behalf of a busy
//! principal: score it, triage it, and when a reply is warranted pick
//! exactly one structured action for it. Every remote dependency is
//! wrapped in retry, circuit breaking, rate limiting and metrics.
//!
//! # Overview
//!
//! - **Priority**: Deterministic keyword and pattern scoring, 0-100
//! - **Triage**: Remote classification into `no`, `email` or `notify`
//! - **Drafting**: Exactly-one-tool-call protocol with corrective retries
//! - **Resilience**: Per-service retry policy, breaker, limiter and metrics
//! - **Audit**: Structured event trail for every email
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use exec_assistant::{
//!     audit::MemoryAuditLog, config::Config, store::InMemoryStore, triage::StaticExamples,
//!     EmailAssistant, ModelClient,
//! };
//!
//! async fn run(model: Arc<dyn ModelClient>, email: exec_assistant::Email) -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let assistant = EmailAssistant::new(
//!         &config,
//!         Arc::new(InMemoryStore::new()),
//!         model,
//!         Arc::new(StaticExamples::default()),
//!         Arc::new(MemoryAuditLog::new()),
//!     );
//!
//!     let mut history = Vec::new();
//!     let processed = assistant.process(&email, &mut history).await;
//!     println!("{} -> {}", processed.email_id, processed.decision);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`assistant`] - Per-email pipeline and batch processing
//! - [`audit`] - Audit events, sinks and summaries
//! - [`circuit_breaker`] - Per-service circuit breaker
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`draft`] - Preference loading and action drafting
//! - [`error`] - Error types and result aliases
//! - [`llm`] - Remote model boundary and tool schemas
//! - [`metrics`] - Operation metrics and health
//! - [`models`] - Core data structures
//! - [`priority`] - Priority scoring
//! - [`rate_limiter`] - Sliding-window call limiter
//! - [`resilience`] - Service guards and the shared resilience context
//! - [`retry`] - Retry policy and execution
//! - [`store`] - Preference and record store
//! - [`triage`] - Triage classification

pub mod assistant;
pub mod audit;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod draft;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod priority;
pub mod rate_limiter;
pub mod resilience;
pub mod retry;
pub mod store;
pub mod triage;

// Re-export commonly used types for convenience
pub use error::{AssistantError, ErrorKind, Result};

// Core data models
pub use models::{
    Action, ActionKind, ChatMessage, Conversation, Email, ModelResponse, PriorityCategory,
    PriorityScore, ToolCall, TriageDecision,
};

// Pipeline
pub use assistant::{EmailAssistant, ProcessedEmail};
pub use draft::{DraftOrchestrator, DraftOutcome, PreferenceLoader, Preferences};
pub use priority::PriorityScorer;
pub use triage::{FewShotSource, StaticExamples, TriageClassifier};

// Collaborator traits
pub use audit::{AuditEvent, AuditSink};
pub use llm::ModelClient;
pub use store::PreferenceStore;

// Resilience
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use metrics::{HealthReport, HealthStatus, MetricsRegistry, MetricsSummary};
pub use rate_limiter::SlidingWindowLimiter;
pub use resilience::{ResilienceContext, ServiceGuard};
pub use retry::RetryPolicy;

// Config types
pub use config::{AssistantConfig, Config, ResilienceConfig, ServiceConfig};

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
