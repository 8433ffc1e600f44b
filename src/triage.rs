//! Triage: scored email -> {no, email, notify}
//!
//! The classifier holds no state between emails. It persists the priority
//! score before asking the model, falls back to `notify` on any failure, and
//! always discards conversation history carried over from an earlier pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::audit::{error_types, AuditEvent, AuditSink};
use crate::config::{AssistantConfig, Config};
use crate::error::Result;
use crate::llm::{ModelClient, LLM_SERVICE};
use crate::models::{Conversation, Email, PriorityRecord, PriorityScore, TriageDecision, TriageRecord};
use crate::resilience::ResilienceContext;
use crate::store::{priority_key, triage_key, PreferenceStore};

/// Operation name for stage-level triage metrics
pub const TRIAGE_OPERATION: &str = "triage";

/// Supplies labelled example emails used as few-shot context
#[async_trait]
pub trait FewShotSource: Send + Sync {
    async fn examples(&self, email: &Email) -> Result<String>;
}

/// Few-shot source returning the same text for every email
#[derive(Debug, Clone, Default)]
pub struct StaticExamples {
    text: String,
}

impl StaticExamples {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl FewShotSource for StaticExamples {
    async fn examples(&self, _email: &Email) -> Result<String> {
        Ok(self.text.clone())
    }
}

pub struct TriageClassifier {
    assistant: AssistantConfig,
    store: Arc<dyn PreferenceStore>,
    model: Arc<dyn ModelClient>,
    resilience: Arc<ResilienceContext>,
    audit: Arc<dyn AuditSink>,
    call_timeout: Option<Duration>,
}

impl TriageClassifier {
    pub fn new(
        config: &Config,
        store: Arc<dyn PreferenceStore>,
        model: Arc<dyn ModelClient>,
        resilience: Arc<ResilienceContext>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            assistant: config.assistant.clone(),
            store,
            model,
            resilience,
            audit,
            call_timeout: config.processing.call_timeout(),
        }
    }

    /// Classify one email. Never fails: any error along the way yields `notify`.
    ///
    /// `history` is cleared before returning, whatever the outcome.
    pub async fn classify(
        &self,
        email: &Email,
        history: &mut Conversation,
        fewshot: &str,
        priority: &PriorityScore,
    ) -> TriageDecision {
        let started = Instant::now();

        info!(
            email_id = %email.id,
            "Triaging email from {} with priority {}/100 ({})",
            email.from,
            priority.total(),
            priority.category()
        );

        // Persist first so the score survives a crash mid-call
        self.persist_priority(email, priority).await;

        let prompt = render_prompt(&self.assistant, email, fewshot, priority);
        let guard = self.resilience.service(LLM_SERVICE).await;
        let model = &self.model;

        let outcome = guard
            .call(self.call_timeout, || model.classify_email(&prompt))
            .await
            .and_then(|raw| raw.parse::<TriageDecision>());

        let (decision, stage_error) = match outcome {
            Ok(decision) => (decision, None),
            Err(e) => {
                warn!(email_id = %email.id, "Triage failed, defaulting to notify: {}", e);
                self.audit
                    .record(AuditEvent::error(
                        &email.id,
                        error_types::TRIAGE_ERROR,
                        &e.to_string(),
                    ))
                    .await;
                (TriageDecision::Notify, Some(e.kind()))
            }
        };

        if !history.is_empty() {
            debug!(
                email_id = %email.id,
                "Discarding {} messages of prior conversation",
                history.len()
            );
            history.clear();
        }

        self.persist_decision(email, decision, priority).await;
        self.audit
            .record(AuditEvent::triage_decision(&email.id, decision, priority.total()))
            .await;

        self.resilience
            .metrics()
            .record(TRIAGE_OPERATION, started.elapsed(), stage_error)
            .await;

        info!(email_id = %email.id, "Triage decision: {}", decision);
        decision
    }

    async fn persist_priority(&self, email: &Email, priority: &PriorityScore) {
        let record = PriorityRecord::new(priority, email);
        self.persist(email, &priority_key(&email.id), serde_json::to_value(record))
            .await;
    }

    async fn persist_decision(&self, email: &Email, decision: TriageDecision, priority: &PriorityScore) {
        let record = TriageRecord {
            decision,
            priority_score: priority.total(),
            timestamp: email.timestamp,
        };
        self.persist(email, &triage_key(&email.id), serde_json::to_value(record))
            .await;
    }

    async fn persist(
        &self,
        email: &Email,
        key: &str,
        value: std::result::Result<serde_json::Value, serde_json::Error>,
    ) {
        let result = match value {
            Ok(value) => {
                self.store
                    .put(&self.assistant.assistant_id, key, value)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!(email_id = %email.id, "Failed to persist {}: {}", key, e);
            self.audit
                .record(AuditEvent::error(
                    &email.id,
                    error_types::STORE_ERROR,
                    &e.to_string(),
                ))
                .await;
        }
    }
}

/// Render the triage instructions for one email
pub fn render_prompt(
    assistant: &AssistantConfig,
    email: &Email,
    fewshot: &str,
    priority: &PriorityScore,
) -> String {
    let name = &assistant.name;
    format!(
        "You are {full_name}'s executive assistant. You are a top-notch executive assistant \
who cares about {name} performing as well as possible.

{background}

{name} gets lots of emails. Your job is to categorize the below email to see whether it is \
worth responding to.

PRIORITY ANALYSIS:
This email has been automatically scored with a priority of {score}/100 ({category}).
Priority breakdown: {breakdown}

Consider this priority assessment when making your decision, but use your judgment as the \
final arbiter.

Emails that are not worth responding to:
{triage_no}

Emails that are worth responding to:
{triage_email}

There are also other things that {name} should know about, but don't require an email \
response. For these, you should notify {name} (using the `notify` response). Examples of this \
include:
{triage_notify}

For emails not worth responding to, respond `no`. For something where {name} should respond \
over email, respond `email`. If it's important to notify {name}, but no email is required, \
respond `notify`.

If unsure, opt to `notify` {name} - you will learn from this in the future.

{fewshot}

Please determine how to handle the below email thread:

From: {from}
To: {to}
Subject: {subject}

{body}",
        full_name = assistant.full_name,
        name = name,
        background = assistant.background,
        score = priority.total(),
        category = priority.category(),
        breakdown = priority.describe(),
        triage_no = assistant.triage_no,
        triage_email = assistant.triage_email,
        triage_notify = assistant.triage_notify,
        fewshot = fewshot,
        from = email.from,
        to = email.to,
        subject = email.subject,
        body = email.body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, MemoryAuditLog};
    use crate::error::AssistantError;
    use crate::models::{ActionKind, ChatMessage, ModelResponse};
    use crate::priority::PriorityScorer;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Model returning a fixed triage answer, counting calls
    struct FixedModel {
        answer: std::result::Result<String, String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for FixedModel {
        async fn classify_email(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .map_err(AssistantError::ModelError)
        }

        async fn select_action(
            &self,
            _conversation: &[ChatMessage],
            _tools: &[ActionKind],
        ) -> Result<ModelResponse> {
            Err(AssistantError::ModelError("not used".to_string()))
        }
    }

    struct Fixture {
        classifier: TriageClassifier,
        store: Arc<InMemoryStore>,
        audit: Arc<MemoryAuditLog>,
        model: Arc<FixedModel>,
        resilience: Arc<ResilienceContext>,
    }

    fn fixture(answer: std::result::Result<&str, &str>) -> Fixture {
        let mut config = Config::default();
        config.resilience.services.get_mut("llm").unwrap().retry.base_delay_secs = 0.001;

        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let model = Arc::new(FixedModel {
            answer: answer.map(str::to_string).map_err(str::to_string),
            calls: AtomicU32::new(0),
        });
        let resilience = Arc::new(ResilienceContext::from_config(&config));
        let classifier = TriageClassifier::new(
            &config,
            store.clone(),
            model.clone(),
            resilience.clone(),
            audit.clone(),
        );

        Fixture {
            classifier,
            store,
            audit,
            model,
            resilience,
        }
    }

    fn email() -> Email {
        Email {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            from: "boss@x.com".to_string(),
            to: "alex@example.com".to_string(),
            subject: "Budget".to_string(),
            body: "Can you review the budget?".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_classify_parses_model_answer() {
        let f = fixture(Ok(" Email\n"));
        let email = email();
        let priority = PriorityScorer::default().score(&email);
        let mut history = Vec::new();

        let decision = f.classifier.classify(&email, &mut history, "", &priority).await;

        assert_eq!(decision, TriageDecision::Email);
        assert!(f.audit.events_of(AuditAction::Error).await.is_empty());

        let stored = f.store.get("default", "triage_decision_m1").await.unwrap().unwrap();
        assert_eq!(stored["decision"], "email");
        let stored = f.store.get("default", "email_priority_m1").await.unwrap().unwrap();
        assert_eq!(stored["priority_score"], priority.total());
    }

    #[tokio::test]
    async fn test_classify_defaults_to_notify_when_model_fails() {
        let f = fixture(Err("503 overloaded"));
        let email = email();
        let priority = PriorityScorer::default().score(&email);
        let mut history = vec![ChatMessage::user("earlier pass")];

        let decision = f.classifier.classify(&email, &mut history, "", &priority).await;

        assert_eq!(decision, TriageDecision::Notify);
        assert!(history.is_empty());
        // llm profile retries twice
        assert_eq!(f.model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.audit.events_of(AuditAction::Error).await.len(), 1);

        let triage = f.resilience.metrics().summary(TRIAGE_OPERATION).await.unwrap();
        assert_eq!(triage.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_malformed_token_is_not_retried() {
        let f = fixture(Ok("maybe"));
        let email = email();
        let priority = PriorityScorer::default().score(&email);
        let mut history = Vec::new();

        let decision = f.classifier.classify(&email, &mut history, "", &priority).await;

        assert_eq!(decision, TriageDecision::Notify);
        assert_eq!(f.model.calls.load(Ordering::SeqCst), 1);
        let errors = f.audit.events_of(AuditAction::Error).await;
        assert_eq!(errors[0].detail("error_type").unwrap(), "triage_error");
    }

    #[tokio::test]
    async fn test_history_cleared_on_success() {
        let f = fixture(Ok("no"));
        let email = email();
        let priority = PriorityScorer::default().score(&email);
        let mut history = vec![
            ChatMessage::user("draft this"),
            ChatMessage::assistant("done"),
        ];

        let decision = f.classifier.classify(&email, &mut history, "", &priority).await;

        assert_eq!(decision, TriageDecision::No);
        assert!(history.is_empty());
        assert_eq!(f.audit.events_of(AuditAction::TriageDecision).await.len(), 1);
    }

    #[test]
    fn test_prompt_includes_priority_and_examples() {
        let assistant = AssistantConfig::default();
        let email = email();
        let priority = PriorityScorer::new(["boss@x.com"]).score(&email);

        let prompt = render_prompt(&assistant, &email, "EXAMPLE: lunch -> no", &priority);

        assert!(prompt.contains(&format!("{}/100", priority.total())));
        assert!(prompt.contains("Vip Sender: +30"));
        assert!(prompt.contains("EXAMPLE: lunch -> no"));
        assert!(prompt.contains("Subject: Budget"));
        assert!(prompt.contains(&assistant.full_name));
    }

    #[tokio::test]
    async fn test_static_examples() {
        let source = StaticExamples::new("examples");
        assert_eq!(source.examples(&email()).await.unwrap(), "examples");
    }
}
