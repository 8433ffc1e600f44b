//! Boundary to the remote language model
//!
//! The engine never talks to a provider directly. Triage and drafting go
//! through `ModelClient`, which any transport can implement; calls may fail
//! transiently or permanently and are always made through a `ServiceGuard`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::{ActionKind, ChatMessage, ModelResponse};

/// Service name every model call is guarded under
pub const LLM_SERVICE: &str = "llm";

/// Trait defining remote model operations for easier testing
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Classify a fully rendered triage prompt, returning the raw decision token
    async fn classify_email(&self, prompt: &str) -> Result<String>;

    /// Ask the model to call one of `tools` given the conversation so far
    async fn select_action(
        &self,
        conversation: &[ChatMessage],
        tools: &[ActionKind],
    ) -> Result<ModelResponse>;
}

fn string_list(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

/// JSON schema of the arguments a tool call must carry
pub fn parameters_schema(kind: ActionKind) -> Value {
    match kind {
        ActionKind::Question => json!({
            "type": "object",
            "properties": { "content": { "type": "string", "description": "Question to ask" } },
            "required": ["content"],
        }),
        ActionKind::ResponseEmailDraft => json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Body of the reply" },
                "new_recipients": string_list("Addresses to add to the thread"),
            },
            "required": ["content"],
        }),
        ActionKind::NewEmailDraft => json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Body of the new email" },
                "recipients": string_list("Addresses to send the email to"),
            },
            "required": ["content", "recipients"],
        }),
        ActionKind::MeetingAssistant => json!({
            "type": "object",
            "properties": { "call": { "type": "boolean" } },
            "required": ["call"],
        }),
        ActionKind::SendCalendarInvite => json!({
            "type": "object",
            "properties": {
                "emails": string_list("Attendee addresses"),
                "title": { "type": "string" },
                "start_time": { "type": "string", "description": "ISO 8601 start" },
                "end_time": { "type": "string", "description": "ISO 8601 end" },
            },
            "required": ["emails", "title", "start_time", "end_time"],
        }),
        ActionKind::Ignore => json!({
            "type": "object",
            "properties": { "ignore": { "type": "boolean" } },
            "required": ["ignore"],
        }),
    }
}

/// Function-calling tool definitions for the permitted vocabulary
pub fn tool_definitions(tools: &[ActionKind]) -> Vec<Value> {
    tools
        .iter()
        .map(|kind| {
            json!({
                "name": kind.name(),
                "description": kind.description(),
                "parameters": parameters_schema(*kind),
            })
        })
        .collect()
}
