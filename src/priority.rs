//! Rule-based priority scoring for incoming email
//!
//! Every sub-score is computed independently from the email's fields and the
//! named parts are summed into a total capped at 100. Scoring is pure: no I/O,
//! no clock, no shared state.

use crate::models::{Email, PriorityCategory, PriorityScore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

pub const VIP_SENDER: &str = "vip_sender";
pub const SUBJECT_URGENCY: &str = "subject_urgency";
pub const CONTENT_URGENCY: &str = "content_urgency";
pub const TIME_SENSITIVITY: &str = "time_sensitivity";
pub const MEETING_REQUEST: &str = "meeting_request";
pub const ACTION_REQUIRED: &str = "action_required";
pub const THREAD_IMPORTANCE: &str = "thread_importance";

static URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "emergency",
    "critical",
    "immediate",
    "deadline",
    "time-sensitive",
    "priority",
    "rush",
];

static MEETING_KEYWORDS: &[&str] = &[
    "meeting",
    "call",
    "schedule",
    "calendar",
    "appointment",
    "zoom",
    "teams",
    "conference",
    "discussion",
];

/// Weaker deadline phrases, only consulted when no time pattern matched
static TIME_PHRASES: &[&str] = &["time sensitive", "deadline", "due date"];

static TIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"by (?:today|tomorrow|end of (?:day|week))",
        r"within \d+ (?:hours?|days?)",
        r"deadline.*(?:today|tomorrow|this week)",
        r"need.*(?:today|tomorrow|asap|immediately)",
    ])
});

static SCHEDULING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"when (?:are you|would you be) (?:available|free)",
        r"schedule.*(?:meeting|call|time)",
        r"let's (?:meet|schedule|set up)",
        r"available for.*(?:call|meeting|discussion)",
    ])
});

static ACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"can you (?:please )?(?:help|assist|provide|send|review)",
        r"could you (?:please )?(?:help|assist|provide|send|review)",
        r"would you (?:please )?(?:help|assist|provide|send|review)",
        r"please (?:help|assist|provide|send|review|confirm|let me know)",
        r"need you to",
        r"requesting.*(?:help|assistance|information)",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("priority pattern must compile"))
        .collect()
}

fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn pattern_hits(text: &str, patterns: &[Regex]) -> usize {
    patterns.iter().filter(|p| p.is_match(text)).count()
}

/// Scores emails from configured VIPs and textual urgency signals
#[derive(Debug, Clone, Default)]
pub struct PriorityScorer {
    vip_contacts: HashSet<String>,
}

impl PriorityScorer {
    pub fn new<I, S>(vip_contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            vip_contacts: vip_contacts
                .into_iter()
                .map(|vip| vip.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// Score an email from 0 to 100 with a named breakdown
    pub fn score(&self, email: &Email) -> PriorityScore {
        let body = email.body.to_lowercase();

        let mut breakdown = BTreeMap::new();
        breakdown.insert(VIP_SENDER.to_string(), self.score_vip_sender(&email.from));
        breakdown.insert(
            SUBJECT_URGENCY.to_string(),
            score_subject_urgency(&email.subject),
        );
        breakdown.insert(CONTENT_URGENCY.to_string(), score_content_urgency(&body));
        breakdown.insert(TIME_SENSITIVITY.to_string(), score_time_sensitivity(&body));
        breakdown.insert(MEETING_REQUEST.to_string(), score_meeting_request(&body));
        breakdown.insert(
            ACTION_REQUIRED.to_string(),
            score_action_required(&email.body, &body),
        );
        breakdown.insert(THREAD_IMPORTANCE.to_string(), score_thread_length(&body));

        PriorityScore::from_breakdown(breakdown)
    }

    /// Convert a numeric total into its category
    pub fn category(&self, total: u8) -> PriorityCategory {
        PriorityCategory::from_score(total)
    }

    fn score_vip_sender(&self, from: &str) -> u32 {
        if self.vip_contacts.contains(&from.trim().to_lowercase()) {
            30
        } else {
            0
        }
    }
}

fn score_subject_urgency(subject: &str) -> u32 {
    let subject = subject.to_lowercase();

    if subject.contains("urgent") || subject.contains("asap") {
        return 25;
    }

    match keyword_hits(&subject, URGENT_KEYWORDS) {
        0 => 0,
        1 => 10,
        _ => 20,
    }
}

fn score_content_urgency(body: &str) -> u32 {
    match keyword_hits(body, URGENT_KEYWORDS) {
        0 => 0,
        1 => 5,
        2 => 10,
        _ => 15,
    }
}

fn score_time_sensitivity(body: &str) -> u32 {
    if TIME_PATTERNS.iter().any(|p| p.is_match(body)) {
        15
    } else if TIME_PHRASES.iter().any(|phrase| body.contains(phrase)) {
        10
    } else {
        0
    }
}

fn score_meeting_request(body: &str) -> u32 {
    let meeting_count = keyword_hits(body, MEETING_KEYWORDS);
    let has_scheduling = SCHEDULING_PATTERNS.iter().any(|p| p.is_match(body));

    if has_scheduling && meeting_count >= 2 {
        15
    } else if has_scheduling || meeting_count >= 3 {
        10
    } else if meeting_count >= 1 {
        5
    } else {
        0
    }
}

fn score_action_required(raw_body: &str, body: &str) -> u32 {
    let question_score = match raw_body.matches('?').count() {
        0 => 0,
        1 | 2 => 5,
        _ => 10,
    };

    let action_score = match pattern_hits(body, &ACTION_PATTERNS) {
        0 => 0,
        1 => 5,
        _ => 10,
    };

    question_score + action_score
}

/// Longer quoted threads suggest an ongoing, more important conversation
fn score_thread_length(body: &str) -> u32 {
    match body.matches("from:").count() {
        0 | 1 => 0,
        2 => 2,
        3 | 4 => 5,
        _ => 10,
    }
}
