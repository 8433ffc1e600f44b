//! Drafting: choose exactly one action for an email worth answering
//!
//! The orchestrator offers the model a fixed tool vocabulary and insists on a
//! single valid tool call. Invalid answers get a corrective instruction and
//! another attempt, up to the configured budget. Nothing here returns an
//! error to the caller: failures become a fallback question or an
//! `Unresolved` outcome, and every one of them is audited.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::audit::{error_types, AuditEvent, AuditSink};
use crate::config::{AssistantConfig, Config};
use crate::error::{AssistantError, ErrorKind, Result};
use crate::llm::{ModelClient, LLM_SERVICE};
use crate::models::{Action, ActionKind, ChatMessage, Email, ModelResponse, PriorityScore};
use crate::resilience::ResilienceContext;
use crate::store::{
    PreferenceStore, BACKGROUND_PREFERENCES, RESPONSE_PREFERENCES, SCHEDULE_PREFERENCES,
};

/// Operation name for stage-level drafting metrics
pub const DRAFT_OPERATION: &str = "draft";

/// Appended to the conversation after every invalid answer
pub const CORRECTIVE_INSTRUCTION: &str = "Please call exactly one valid tool.";

/// Question returned when the model cannot be reached at all
pub const FALLBACK_QUESTION: &str =
    "I encountered an error. Could you please clarify what you'd like me to do with this email?";

/// The three preference documents that shape a draft
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub schedule: String,
    pub background: String,
    pub response: String,
}

impl Preferences {
    pub fn defaults_from(config: &AssistantConfig) -> Self {
        Self {
            schedule: config.schedule_preferences.clone(),
            background: config.background_preferences.clone(),
            response: config.response_preferences.clone(),
        }
    }
}

/// Reads preference documents, seeding missing ones with configured defaults
pub struct PreferenceLoader {
    store: Arc<dyn PreferenceStore>,
    namespace: String,
    defaults: Preferences,
}

impl PreferenceLoader {
    pub fn new(config: &AssistantConfig, store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            namespace: config.assistant_id.clone(),
            defaults: Preferences::defaults_from(config),
        }
    }

    /// Load all three documents. Each key fails independently to its default.
    pub async fn load(&self) -> Preferences {
        Preferences {
            schedule: self
                .load_key(SCHEDULE_PREFERENCES, &self.defaults.schedule)
                .await,
            background: self
                .load_key(BACKGROUND_PREFERENCES, &self.defaults.background)
                .await,
            response: self
                .load_key(RESPONSE_PREFERENCES, &self.defaults.response)
                .await,
        }
    }

    async fn load_key(&self, key: &str, default: &str) -> String {
        let stored = match self.store.get(&self.namespace, key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Error loading preference {}: {}", key, e);
                return default.to_string();
            }
        };

        if let Some(data) = stored.as_ref().and_then(|value| value.get("data")) {
            return match data.as_str() {
                Some(text) => text.to_string(),
                None => data.to_string(),
            };
        }

        debug!("Seeding preference {} with configured default", key);
        if let Err(e) = self
            .store
            .put(&self.namespace, key, preference_document(default))
            .await
        {
            warn!("Failed to store default for preference {}: {}", key, e);
        }
        default.to_string()
    }
}

/// Result of one drafting pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DraftOutcome {
    /// Exactly one validated action
    Action { action: Action },
    /// The attempt budget ran out; the last raw response, as returned
    Unresolved { response: ModelResponse },
}

impl DraftOutcome {
    pub fn action(&self) -> Option<&Action> {
        match self {
            DraftOutcome::Action { action } => Some(action),
            DraftOutcome::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, DraftOutcome::Action { .. })
    }
}

/// Selectable tools for a pass: `Ignore` only once the thread has history
pub fn vocabulary(history: &[ChatMessage]) -> Vec<ActionKind> {
    let mut tools = ActionKind::BASE.to_vec();
    if !history.is_empty() {
        tools.push(ActionKind::Ignore);
    }
    tools
}

/// Accept a response only if it carries exactly one permitted, well-formed tool call
pub fn validate_response(response: &ModelResponse, tools: &[ActionKind]) -> Result<Action> {
    match response.tool_calls.as_slice() {
        [call] => Action::from_tool_call(call, tools),
        calls => Err(AssistantError::ProtocolViolation(format!(
            "expected exactly one tool call, got {}",
            calls.len()
        ))),
    }
}

pub struct DraftOrchestrator {
    assistant: AssistantConfig,
    model: Arc<dyn ModelClient>,
    resilience: Arc<ResilienceContext>,
    audit: Arc<dyn AuditSink>,
    max_attempts: u32,
    call_timeout: Option<Duration>,
}

impl DraftOrchestrator {
    pub fn new(
        config: &Config,
        model: Arc<dyn ModelClient>,
        resilience: Arc<ResilienceContext>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            assistant: config.assistant.clone(),
            model,
            resilience,
            audit,
            max_attempts: config.drafting.max_attempts.max(1),
            call_timeout: config.processing.call_timeout(),
        }
    }

    /// Produce the single action for `email`.
    ///
    /// `history` is the thread's prior conversation; when non-empty it is
    /// replayed after the instructions and unlocks `Ignore`.
    pub async fn draft(
        &self,
        email: &Email,
        priority: Option<&PriorityScore>,
        preferences: &Preferences,
        history: &[ChatMessage],
    ) -> DraftOutcome {
        let started = Instant::now();
        let (outcome, stage_error) = self.run(email, priority, preferences, history).await;
        self.resilience
            .metrics()
            .record(DRAFT_OPERATION, started.elapsed(), stage_error)
            .await;
        outcome
    }

    async fn run(
        &self,
        email: &Email,
        priority: Option<&PriorityScore>,
        preferences: &Preferences,
        history: &[ChatMessage],
    ) -> (DraftOutcome, Option<ErrorKind>) {
        info!(email_id = %email.id, "Starting draft response");

        let tools = vocabulary(history);
        let mut conversation = Vec::with_capacity(history.len() + 2);
        conversation.push(ChatMessage::user(render_prompt(
            &self.assistant,
            email,
            preferences,
            priority,
        )));
        conversation.extend(history.iter().cloned());

        let guard = self.resilience.service(LLM_SERVICE).await;
        let model = &self.model;
        let mut last_response = ModelResponse::default();

        for attempt in 0..self.max_attempts {
            let request = &conversation;
            let response = match guard
                .call(self.call_timeout, || model.select_action(request, &tools))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(email_id = %email.id, "Error drafting response: {}", e);
                    self.audit
                        .record(AuditEvent::error(
                            &email.id,
                            error_types::DRAFT_ERROR,
                            &e.to_string(),
                        ))
                        .await;
                    let fallback = Action::Question {
                        content: FALLBACK_QUESTION.to_string(),
                    };
                    return (DraftOutcome::Action { action: fallback }, Some(e.kind()));
                }
            };

            match validate_response(&response, &tools) {
                Ok(action) => {
                    info!(email_id = %email.id, "Drafted {}", action.kind());
                    self.audit
                        .record(AuditEvent::email_drafted(
                            &email.id,
                            action.kind().name(),
                            action.recipient_count(),
                        ))
                        .await;
                    return (DraftOutcome::Action { action }, None);
                }
                Err(e) => {
                    warn!(
                        email_id = %email.id,
                        "Invalid tool call response, attempt {}/{}: {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_response = response;
                    if attempt + 1 < self.max_attempts {
                        conversation.push(ChatMessage::user(CORRECTIVE_INSTRUCTION));
                    }
                }
            }
        }

        error!(
            email_id = %email.id,
            "No valid tool call after {} attempts", self.max_attempts
        );
        self.audit
            .record(AuditEvent::error(
                &email.id,
                error_types::INVALID_TOOL_CALL,
                &format!("No valid tool call after {} attempts", self.max_attempts),
            ))
            .await;

        (
            DraftOutcome::Unresolved {
                response: last_response,
            },
            Some(ErrorKind::Protocol),
        )
    }
}

/// Instruction fragment describing the computed priority
pub fn priority_context(priority: &PriorityScore) -> String {
    format!(
        "\n\nPRIORITY CONTEXT: This email was scored {}/100 ({} priority). \
Consider this when crafting your response.",
        priority.total(),
        priority.category()
    )
}

fn render_prompt(
    assistant: &AssistantConfig,
    email: &Email,
    preferences: &Preferences,
    priority: Option<&PriorityScore>,
) -> String {
    let mut instructions = render_instructions(assistant, preferences);
    if let Some(priority) = priority {
        instructions.push_str(&priority_context(priority));
    }

    format!(
        "{instructions}

Remember to call a tool correctly! Use the specified names exactly - do not add `functions::` \
to the start. Pass all required arguments.

Here is the email thread. Note that this is the full email thread. Pay special attention to \
the most recent email.

From: {from}
To: {to}
Subject: {subject}

{body}",
        instructions = instructions,
        from = email.from,
        to = email.to,
        subject = email.subject,
        body = email.body,
    )
}

fn render_instructions(assistant: &AssistantConfig, preferences: &Preferences) -> String {
    let name = &assistant.name;
    format!(
        "You are {full_name}'s executive assistant. You are a top-notch executive assistant \
who cares about {name} performing as well as possible.

{background}

{name} gets lots of emails. This has been determined to be an email that is worth {name} \
responding to.

Your job is to help {name} respond. You can do this in a few ways.

# Using the `Question` tool

First, get all required information to respond. If you do not have all the information \
needed to respond in the most appropriate way, call the `Question` tool until you have it. \
Never draft an email with placeholders for names, emails or facts - ask {name} instead. \
Never use the Question tool to ask {name} when they are free - ask the MeetingAssistant.

# Using the `ResponseEmailDraft` tool

If you have enough information to respond, draft a reply with the `ResponseEmailDraft` tool. \
Always write as {name}, never as their assistant. Only add new recipients when {name} \
explicitly asks for it and you know their addresses.

{response_preferences}

# Using the `SendCalendarInvite` tool

If you are sure {name} wants to meet and their calendar is free, schedule the meeting with \
the `SendCalendarInvite` tool.

{schedule_preferences}

# Using the `NewEmailDraft` tool

If you need to start a new email thread and have all the necessary information, use the \
`NewEmailDraft` tool.

# Using the `MeetingAssistant` tool

If the email is from a legitimate person working to schedule a meeting, call the \
`MeetingAssistant` tool to get a response from a specialist.

# Background information: information you may find helpful when responding to emails or \
deciding what to do.

{background_preferences}",
        full_name = assistant.full_name,
        name = name,
        background = assistant.background,
        response_preferences = preferences.response,
        schedule_preferences = preferences.schedule,
        background_preferences = preferences.background,
    )
}

/// Document stored for a preference key
pub fn preference_document(data: &str) -> Value {
    json!({ "data": data })
}
