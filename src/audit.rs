//! Append-only audit trail of everything the engine decides or does
//!
//! Each event carries its action type, the originating email id, a few
//! action-specific fields and a timestamp. Recording never fails from the
//! caller's point of view: a sink that cannot persist an event logs the problem
//! and moves on, so auditing can never take down email processing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{AssistantError, Result};
use crate::models::TriageDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    EmailReceived,
    TriageDecision,
    EmailDrafted,
    EmailSent,
    CalendarInviteSent,
    HumanIntervention,
    Error,
}

impl AuditAction {
    pub const ALL: [AuditAction; 7] = [
        AuditAction::EmailReceived,
        AuditAction::TriageDecision,
        AuditAction::EmailDrafted,
        AuditAction::EmailSent,
        AuditAction::CalendarInviteSent,
        AuditAction::HumanIntervention,
        AuditAction::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EmailReceived => "email_received",
            AuditAction::TriageDecision => "triage_decision",
            AuditAction::EmailDrafted => "email_drafted",
            AuditAction::EmailSent => "email_sent",
            AuditAction::CalendarInviteSent => "calendar_invite_sent",
            AuditAction::HumanIntervention => "human_intervention",
            AuditAction::Error => "error",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// `error_type` values written by the engine
pub mod error_types {
    pub const INVALID_TOOL_CALL: &str = "invalid_tool_call";
    pub const DRAFT_ERROR: &str = "draft_error";
    pub const TRIAGE_ERROR: &str = "triage_error";
    pub const STORE_ERROR: &str = "store_error";
    pub const FEWSHOT_ERROR: &str = "fewshot_error";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub email_id: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, email_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            email_id: email_id.to_string(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach an action-specific field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn email_received(email_id: &str, from: &str, subject: &str) -> Self {
        Self::new(AuditAction::EmailReceived, email_id)
            .with("from_email", from)
            .with("subject", subject)
    }

    pub fn triage_decision(email_id: &str, decision: TriageDecision, priority_score: u8) -> Self {
        Self::new(AuditAction::TriageDecision, email_id)
            .with("decision", decision.as_str())
            .with("priority_score", priority_score)
    }

    pub fn email_drafted(email_id: &str, draft_type: &str, recipient_count: usize) -> Self {
        Self::new(AuditAction::EmailDrafted, email_id)
            .with("draft_type", draft_type)
            .with("recipient_count", recipient_count)
    }

    pub fn email_sent(email_id: &str, recipients: &[String], subject: &str) -> Self {
        Self::new(AuditAction::EmailSent, email_id)
            .with("recipients", json!(recipients))
            .with("subject", subject)
    }

    pub fn calendar_invite_sent(email_id: &str, attendees: &[String], meeting_title: &str) -> Self {
        Self::new(AuditAction::CalendarInviteSent, email_id)
            .with("attendees", json!(attendees))
            .with("meeting_title", meeting_title)
    }

    pub fn human_intervention(email_id: &str, intervention_type: &str, reason: &str) -> Self {
        Self::new(AuditAction::HumanIntervention, email_id)
            .with("intervention_type", intervention_type)
            .with("reason", reason)
    }

    pub fn error(email_id: &str, error_type: &str, error_message: &str) -> Self {
        Self::new(AuditAction::Error, email_id)
            .with("error_type", error_type)
            .with("error_message", error_message)
    }
}

/// Counts over a trailing window of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub days: u32,
    pub since: DateTime<Utc>,
    /// Events per action type; every action is present, zero when unseen
    pub counts: BTreeMap<AuditAction, u64>,
    /// Triage events per decision (`no`, `email`, `notify`)
    pub triage_decisions: BTreeMap<String, u64>,
}

impl AuditSummary {
    fn empty(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            days,
            since: ChronoDuration::try_days(i64::from(days))
                .and_then(|window| now.checked_sub_signed(window))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            counts: AuditAction::ALL.iter().map(|action| (*action, 0)).collect(),
            triage_decisions: TriageDecision::ALL
                .iter()
                .map(|decision| (decision.as_str().to_string(), 0))
                .collect(),
        }
    }

    pub fn count(&self, action: AuditAction) -> u64 {
        self.counts.get(&action).copied().unwrap_or(0)
    }

    fn add(&mut self, event: &AuditEvent) {
        if event.timestamp < self.since {
            return;
        }

        *self.counts.entry(event.action).or_insert(0) += 1;

        if event.action == AuditAction::TriageDecision {
            if let Some(decision) = event.detail("decision").and_then(Value::as_str) {
                *self
                    .triage_decisions
                    .entry(decision.to_string())
                    .or_insert(0) += 1;
            }
        }
    }
}

/// Summarize the events of the trailing `days` days
pub fn summarize<'a>(events: impl IntoIterator<Item = &'a AuditEvent>, days: u32) -> AuditSummary {
    let mut summary = AuditSummary::empty(days, Utc::now());
    for event in events {
        summary.add(event);
    }
    summary
}

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event. Persistence failures are logged, never returned.
    async fn record(&self, event: AuditEvent);

    /// Count events per action type over the trailing `days` days
    async fn summary(&self, days: u32) -> Result<AuditSummary>;
}

/// Audit log kept in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event, oldest first
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    /// Recorded events of one action type
    pub async fn events_of(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        debug!(action = %event.action, email_id = %event.email_id, "Audit event");
        self.events.lock().await.push(event);
    }

    async fn summary(&self, days: u32) -> Result<AuditSummary> {
        let events = self.events.lock().await;
        Ok(summarize(events.iter(), days))
    }
}

/// Audit log appended to a file, one JSON event per line
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every parseable event from the log. Malformed lines are skipped.
    pub async fn read_events(&self) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Err(AssistantError::AuditError(format!(
                "Audit log file not found: {:?}",
                self.path
            )));
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut events = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping malformed audit line {} in {:?}: {}",
                    index + 1,
                    self.path,
                    e
                ),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.append(&event).await {
            error!(
                action = %event.action,
                email_id = %event.email_id,
                "Failed to write audit event to {:?}: {}",
                self.path,
                e
            );
        }
    }

    async fn summary(&self, days: u32) -> Result<AuditSummary> {
        let events = self.read_events().await?;
        Ok(summarize(events.iter(), days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_serializes_flat() {
        let event = AuditEvent::email_drafted("m1", "ResponseEmailDraft", 2);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["action"], "email_drafted");
        assert_eq!(value["email_id"], "m1");
        assert_eq!(value["draft_type"], "ResponseEmailDraft");
        assert_eq!(value["recipient_count"], 2);
        assert!(value["timestamp"].is_string());

        let parsed: AuditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_summary_ignores_old_events() {
        let mut old = AuditEvent::error("m1", error_types::DRAFT_ERROR, "boom");
        old.timestamp = Utc::now() - ChronoDuration::days(10);
        let recent = AuditEvent::error("m2", error_types::DRAFT_ERROR, "boom");

        let summary = summarize([&old, &recent], 7);
        assert_eq!(summary.count(AuditAction::Error), 1);
        assert_eq!(summary.count(AuditAction::EmailSent), 0);
        assert_eq!(summary.counts.len(), AuditAction::ALL.len());
    }

    #[tokio::test]
    async fn test_summary_window_beyond_calendar_range() {
        let log = MemoryAuditLog::new();
        log.record(AuditEvent::email_received("m1", "a@x.com", "Hi"))
            .await;

        let summary = log.summary(100_000_000).await.unwrap();
        assert_eq!(summary.since, DateTime::<Utc>::MIN_UTC);
        assert_eq!(summary.count(AuditAction::EmailReceived), 1);

        let summary = summarize(std::iter::empty(), u32::MAX);
        assert_eq!(summary.days, u32::MAX);
    }

    #[tokio::test]
    async fn test_memory_log_summary() {
        let log = MemoryAuditLog::new();
        log.record(AuditEvent::email_received("m1", "a@x.com", "Hi"))
            .await;
        log.record(AuditEvent::triage_decision("m1", TriageDecision::Email, 80))
            .await;
        log.record(AuditEvent::triage_decision("m2", TriageDecision::Notify, 10))
            .await;
        log.record(AuditEvent::calendar_invite_sent(
            "m1",
            &["b@x.com".to_string()],
            "Sync",
        ))
        .await;

        let summary = log.summary(7).await.unwrap();
        assert_eq!(summary.count(AuditAction::EmailReceived), 1);
        assert_eq!(summary.count(AuditAction::TriageDecision), 2);
        assert_eq!(summary.count(AuditAction::CalendarInviteSent), 1);
        assert_eq!(summary.triage_decisions["email"], 1);
        assert_eq!(summary.triage_decisions["notify"], 1);
        assert_eq!(summary.triage_decisions["no"], 0);

        assert_eq!(log.events_of(AuditAction::TriageDecision).await.len(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("logs").join("audit.jsonl"));

        log.record(AuditEvent::email_sent(
            "m1",
            &["a@x.com".to_string()],
            "Re: contract",
        ))
        .await;
        log.record(AuditEvent::human_intervention("m2", "review", "unclear request"))
            .await;

        let events = log.read_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::EmailSent);
        assert_eq!(events[1].detail("reason"), Some(&json!("unclear request")));

        let summary = log.summary(1).await.unwrap();
        assert_eq!(summary.count(AuditAction::EmailSent), 1);
        assert_eq!(summary.count(AuditAction::HumanIntervention), 1);
    }

    #[tokio::test]
    async fn test_jsonl_log_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::new(&path);

        log.record(AuditEvent::error("m1", error_types::STORE_ERROR, "disk full"))
            .await;
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n");
        std::fs::write(&path, content).unwrap();

        let events = log.read_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(log.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_jsonl_summary_missing_file() {
        let dir = TempDir::new().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("missing.jsonl"));

        assert!(matches!(
            log.summary(7).await,
            Err(AssistantError::AuditError(_))
        ));
    }
}
