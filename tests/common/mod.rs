//! Common test utilities and fixtures

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use exec_assistant::audit::{AuditEvent, AuditSink, AuditSummary, MemoryAuditLog};
use exec_assistant::config::Config;
use exec_assistant::error::Result;
use exec_assistant::llm::ModelClient;
use exec_assistant::models::{ActionKind, ChatMessage, Email, ModelResponse, ToolCall};
use exec_assistant::resilience::ResilienceContext;
use exec_assistant::store::{InMemoryStore, PreferenceStore};
use exec_assistant::triage::FewShotSource;
use mockall::mock;
use serde_json::{json, Value};

pub const VIP: &str = "ceo@company.com";

/// Create a test email with default values
pub fn create_test_email(id: &str, from: &str, subject: &str, body: &str) -> Email {
    Email {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        from: from.to_string(),
        to: "alex@example.com".to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        timestamp: Utc::now(),
    }
}

/// The urgent VIP request used across pipeline tests (scores 80, critical)
pub fn create_vip_email(id: &str) -> Email {
    create_test_email(
        id,
        VIP,
        "URGENT: contract deadline",
        "I need this asap. Is the draft ready? Did legal sign off?",
    )
}

/// A low-signal newsletter
pub fn create_newsletter_email(id: &str) -> Email {
    create_test_email(
        id,
        "news@letters.com",
        "Weekly digest",
        "Here is what happened this week in gardening.",
    )
}

/// Config with the VIP contact set and zero backoff everywhere
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.assistant.vip_contacts = vec![VIP.to_string()];
    config.resilience.default.retry.base_delay_secs = 0.0;
    config.resilience.default.retry.jitter = false;
    for service in config.resilience.services.values_mut() {
        service.retry.base_delay_secs = 0.0;
        service.retry.jitter = false;
    }
    config
}

pub fn test_resilience(config: &Config) -> Arc<ResilienceContext> {
    Arc::new(ResilienceContext::from_config(config))
}

pub fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

pub fn memory_audit() -> Arc<MemoryAuditLog> {
    Arc::new(MemoryAuditLog::new())
}

/// Model response carrying a single tool call
pub fn tool_response(name: &str, arguments: Value) -> ModelResponse {
    ModelResponse::with_tool_calls(vec![ToolCall::new(name, arguments)])
}

pub fn reply_response(content: &str) -> ModelResponse {
    tool_response("ResponseEmailDraft", json!({ "content": content }))
}

// Mock implementation of ModelClient for testing
mock! {
    pub ModelClient {}

    #[async_trait::async_trait]
    impl ModelClient for ModelClient {
        async fn classify_email(&self, prompt: &str) -> Result<String>;
        async fn select_action(
            &self,
            conversation: &[ChatMessage],
            tools: &[ActionKind],
        ) -> Result<ModelResponse>;
    }
}

// Mock implementation of PreferenceStore for testing
mock! {
    pub PreferenceStore {}

    #[async_trait::async_trait]
    impl PreferenceStore for PreferenceStore {
        async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
        async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    }
}

// Mock implementation of AuditSink for testing
mock! {
    pub AuditSink {}

    #[async_trait::async_trait]
    impl AuditSink for AuditSink {
        async fn record(&self, event: AuditEvent);
        async fn summary(&self, days: u32) -> Result<AuditSummary>;
    }
}

// Mock implementation of FewShotSource for testing
mock! {
    pub FewShotSource {}

    #[async_trait::async_trait]
    impl FewShotSource for FewShotSource {
        async fn examples(&self, email: &Email) -> Result<String>;
    }
}
