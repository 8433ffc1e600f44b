//! Per-email pipeline: score, triage, and draft when a reply is warranted

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{error_types, AuditEvent, AuditSink};
use crate::config::Config;
use crate::draft::{DraftOrchestrator, DraftOutcome, PreferenceLoader};
use crate::llm::ModelClient;
use crate::models::{Conversation, Email, PriorityScore, TriageDecision};
use crate::priority::PriorityScorer;
use crate::resilience::ResilienceContext;
use crate::store::PreferenceStore;
use crate::triage::{FewShotSource, TriageClassifier};

/// Everything decided about one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEmail {
    pub email_id: String,
    pub priority: PriorityScore,
    pub decision: TriageDecision,
    pub draft: Option<DraftOutcome>,
}

pub struct EmailAssistant {
    scorer: PriorityScorer,
    triage: TriageClassifier,
    drafter: DraftOrchestrator,
    preferences: PreferenceLoader,
    fewshot: Arc<dyn FewShotSource>,
    audit: Arc<dyn AuditSink>,
    resilience: Arc<ResilienceContext>,
    max_concurrent: usize,
}

impl EmailAssistant {
    /// Build with a resilience context derived from `config`
    pub fn new(
        config: &Config,
        store: Arc<dyn PreferenceStore>,
        model: Arc<dyn ModelClient>,
        fewshot: Arc<dyn FewShotSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let resilience = Arc::new(ResilienceContext::from_config(config));
        Self::with_resilience(config, resilience, store, model, fewshot, audit)
    }

    /// Build around an existing resilience context, e.g. one shared with other services
    pub fn with_resilience(
        config: &Config,
        resilience: Arc<ResilienceContext>,
        store: Arc<dyn PreferenceStore>,
        model: Arc<dyn ModelClient>,
        fewshot: Arc<dyn FewShotSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            scorer: PriorityScorer::new(&config.assistant.vip_contacts),
            triage: TriageClassifier::new(
                config,
                Arc::clone(&store),
                Arc::clone(&model),
                Arc::clone(&resilience),
                Arc::clone(&audit),
            ),
            drafter: DraftOrchestrator::new(
                config,
                model,
                Arc::clone(&resilience),
                Arc::clone(&audit),
            ),
            preferences: PreferenceLoader::new(&config.assistant, store),
            fewshot,
            audit,
            resilience,
            max_concurrent: config.processing.max_concurrent_emails.max(1),
        }
    }

    pub fn resilience(&self) -> &Arc<ResilienceContext> {
        &self.resilience
    }

    pub fn scorer(&self) -> &PriorityScorer {
        &self.scorer
    }

    /// Run one email through the pipeline.
    ///
    /// `history` is the thread's carried-over conversation. Triage discards
    /// it; drafting always starts from a fresh conversation.
    pub async fn process(&self, email: &Email, history: &mut Conversation) -> ProcessedEmail {
        self.audit
            .record(AuditEvent::email_received(&email.id, &email.from, &email.subject))
            .await;

        let priority = self.scorer.score(email);

        let fewshot = match self.fewshot.examples(email).await {
            Ok(text) => text,
            Err(e) => {
                warn!(email_id = %email.id, "Few-shot examples unavailable: {}", e);
                self.audit
                    .record(AuditEvent::error(
                        &email.id,
                        error_types::FEWSHOT_ERROR,
                        &e.to_string(),
                    ))
                    .await;
                String::new()
            }
        };

        let decision = self
            .triage
            .classify(email, history, &fewshot, &priority)
            .await;

        let draft = if decision == TriageDecision::Email {
            let preferences = self.preferences.load().await;
            Some(
                self.drafter
                    .draft(email, Some(&priority), &preferences, &[])
                    .await,
            )
        } else {
            None
        };

        info!(
            email_id = %email.id,
            "Processed email: priority {}/100, decision {}, drafted {}",
            priority.total(),
            decision,
            draft.is_some()
        );

        ProcessedEmail {
            email_id: email.id.clone(),
            priority,
            decision,
            draft,
        }
    }

    /// Process independent emails concurrently, each with an empty history.
    ///
    /// Results arrive in completion order, not input order.
    pub async fn process_batch(&self, emails: &[Email]) -> Vec<ProcessedEmail> {
        self.process_batch_with(emails, self.max_concurrent).await
    }

    pub async fn process_batch_with(
        &self,
        emails: &[Email],
        max_concurrent: usize,
    ) -> Vec<ProcessedEmail> {
        info!(
            "Processing {} emails with concurrency {}",
            emails.len(),
            max_concurrent
        );

        stream::iter(emails)
            .map(|email| async move {
                let mut history = Conversation::new();
                self.process(email, &mut history).await
            })
            .buffer_unordered(max_concurrent.max(1))
            .collect()
            .await
    }
}
