use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{AssistantError, Result};

/// An incoming email as handed over by the mail transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Priority bucket derived from a total score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PriorityCategory {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityCategory {
    /// Map a total score to its category. Each tier includes its lower bound.
    pub fn from_score(total: u8) -> Self {
        match total {
            70..=u8::MAX => PriorityCategory::Critical,
            50..=69 => PriorityCategory::High,
            30..=49 => PriorityCategory::Medium,
            10..=29 => PriorityCategory::Low,
            _ => PriorityCategory::Minimal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityCategory::Critical => "critical",
            PriorityCategory::High => "high",
            PriorityCategory::Medium => "medium",
            PriorityCategory::Low => "low",
            PriorityCategory::Minimal => "minimal",
        }
    }
}

impl fmt::Display for PriorityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of scoring one email
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityScore {
    total: u8,
    breakdown: BTreeMap<String, u32>,
}

impl PriorityScore {
    /// Build a score from its named parts. The total is capped at 100.
    pub fn from_breakdown(breakdown: BTreeMap<String, u32>) -> Self {
        let sum: u32 = breakdown.values().sum();
        Self {
            total: sum.min(100) as u8,
            breakdown,
        }
    }

    pub fn total(&self) -> u8 {
        self.total
    }

    pub fn breakdown(&self) -> &BTreeMap<String, u32> {
        &self.breakdown
    }

    /// Sub-score by name, 0 when absent
    pub fn component(&self, name: &str) -> u32 {
        self.breakdown.get(name).copied().unwrap_or(0)
    }

    pub fn category(&self) -> PriorityCategory {
        PriorityCategory::from_score(self.total)
    }

    /// Human readable breakdown used in prompts, e.g. "Vip Sender: +30, Subject Urgency: +25"
    pub fn describe(&self) -> String {
        let items: Vec<String> = self
            .breakdown
            .iter()
            .filter(|(_, score)| **score > 0)
            .map(|(name, score)| format!("{}: +{}", title_case(name), score))
            .collect();

        if items.is_empty() {
            "No specific priority indicators".to_string()
        } else {
            items.join(", ")
        }
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Coarse triage outcome for an email
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TriageDecision {
    /// Not worth responding to
    No,
    /// Worth drafting a response
    Email,
    /// The principal should know about it, no reply needed
    Notify,
}

impl TriageDecision {
    pub const ALL: [TriageDecision; 3] = [
        TriageDecision::No,
        TriageDecision::Email,
        TriageDecision::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageDecision::No => "no",
            TriageDecision::Email => "email",
            TriageDecision::Notify => "notify",
        }
    }
}

impl fmt::Display for TriageDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TriageDecision {
    type Err = AssistantError;

    fn from_str(raw: &str) -> Result<Self> {
        let token = raw
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
            .to_lowercase();
        match token.as_str() {
            "no" => Ok(TriageDecision::No),
            "email" => Ok(TriageDecision::Email),
            "notify" => Ok(TriageDecision::Notify),
            _ => Err(AssistantError::ProtocolViolation(format!(
                "expected one of no/email/notify, got '{}'",
                raw.trim()
            ))),
        }
    }
}

/// The selectable action vocabulary, without payloads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActionKind {
    NewEmailDraft,
    ResponseEmailDraft,
    Question,
    MeetingAssistant,
    SendCalendarInvite,
    Ignore,
}

impl ActionKind {
    /// Vocabulary offered on every drafting pass
    pub const BASE: [ActionKind; 5] = [
        ActionKind::NewEmailDraft,
        ActionKind::ResponseEmailDraft,
        ActionKind::Question,
        ActionKind::MeetingAssistant,
        ActionKind::SendCalendarInvite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::NewEmailDraft => "NewEmailDraft",
            ActionKind::ResponseEmailDraft => "ResponseEmailDraft",
            ActionKind::Question => "Question",
            ActionKind::MeetingAssistant => "MeetingAssistant",
            ActionKind::SendCalendarInvite => "SendCalendarInvite",
            ActionKind::Ignore => "Ignore",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches("functions::");
        [ActionKind::Ignore]
            .iter()
            .chain(ActionKind::BASE.iter())
            .find(|kind| kind.name() == name)
            .copied()
    }

    /// Tool description handed to the model
    pub fn description(&self) -> &'static str {
        match self {
            ActionKind::NewEmailDraft => "Draft an email starting a new thread.",
            ActionKind::ResponseEmailDraft => "Draft a reply on the current email thread.",
            ActionKind::Question => "Ask the principal a clarifying question.",
            ActionKind::MeetingAssistant => "Hand the thread to the meeting scheduling specialist.",
            ActionKind::SendCalendarInvite => "Send a calendar invite for a meeting.",
            ActionKind::Ignore => "Take no further action on this thread.",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// The single structured decision produced by a drafting pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "arguments")]
pub enum Action {
    Question {
        content: String,
    },
    ResponseEmailDraft {
        content: String,
        #[serde(default)]
        new_recipients: Vec<String>,
    },
    NewEmailDraft {
        content: String,
        recipients: Vec<String>,
    },
    MeetingAssistant {
        call: bool,
    },
    SendCalendarInvite {
        emails: Vec<String>,
        title: String,
        start_time: String,
        end_time: String,
    },
    Ignore {
        ignore: bool,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Question { .. } => ActionKind::Question,
            Action::ResponseEmailDraft { .. } => ActionKind::ResponseEmailDraft,
            Action::NewEmailDraft { .. } => ActionKind::NewEmailDraft,
            Action::MeetingAssistant { .. } => ActionKind::MeetingAssistant,
            Action::SendCalendarInvite { .. } => ActionKind::SendCalendarInvite,
            Action::Ignore { .. } => ActionKind::Ignore,
        }
    }

    /// Number of addresses the action will reach
    pub fn recipient_count(&self) -> usize {
        match self {
            Action::ResponseEmailDraft { new_recipients, .. } => new_recipients.len(),
            Action::NewEmailDraft { recipients, .. } => recipients.len(),
            Action::SendCalendarInvite { emails, .. } => emails.len(),
            Action::Question { .. } | Action::MeetingAssistant { .. } | Action::Ignore { .. } => 0,
        }
    }

    /// Validate a raw tool call against the permitted vocabulary
    pub fn from_tool_call(call: &ToolCall, allowed: &[ActionKind]) -> Result<Self> {
        let kind = ActionKind::from_name(&call.name).ok_or_else(|| {
            AssistantError::InvalidAction(format!("unknown tool '{}'", call.name))
        })?;

        if !allowed.contains(&kind) {
            return Err(AssistantError::InvalidAction(format!(
                "tool '{}' is not available on this pass",
                kind
            )));
        }

        let tagged = serde_json::json!({
            "name": kind.name(),
            "arguments": call.arguments,
        });
        serde_json::from_value(tagged).map_err(|e| {
            AssistantError::InvalidAction(format!("bad arguments for {}: {}", kind, e))
        })
    }
}

/// One tool invocation as returned by the remote model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Raw output of an action-selection call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the drafting conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation history carried across processing passes of a thread
pub type Conversation = Vec<ChatMessage>;

/// Stored under `email_priority_{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityRecord {
    pub priority_score: u8,
    pub priority_category: PriorityCategory,
    pub priority_breakdown: BTreeMap<String, u32>,
    pub timestamp: DateTime<Utc>,
}

impl PriorityRecord {
    pub fn new(score: &PriorityScore, email: &Email) -> Self {
        Self {
            priority_score: score.total(),
            priority_category: score.category(),
            priority_breakdown: score.breakdown().clone(),
            timestamp: email.timestamp,
        }
    }
}

/// Stored under `triage_decision_{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageRecord {
    pub decision: TriageDecision,
    pub priority_score: u8,
    pub timestamp: DateTime<Utc>,
}
