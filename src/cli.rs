//! Command-line interface

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audit::AuditSummary;
use crate::error::{AssistantError, Result};
use crate::models::{Email, PriorityCategory};
use crate::priority::PriorityScorer;

#[derive(Parser, Debug)]
#[command(name = "exec-assistant")]
#[command(version = "0.1.0")]
#[command(about = "Executive assistant email triage and drafting engine", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score emails from a JSON file and print the priority breakdown
    Score {
        /// JSON array of emails
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Summarize an audit log over a trailing window
    AuditSummary {
        /// Path to the JSON lines audit log
        #[arg(short, long, default_value = "audit.jsonl")]
        log: PathBuf,

        /// Number of trailing days to count
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration file
    CheckConfig,
}

/// Priority result for one email, as printed by `score`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub email_id: String,
    pub from: String,
    pub subject: String,
    pub total: u8,
    pub category: PriorityCategory,
    pub breakdown: BTreeMap<String, u32>,
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Read a JSON array of emails
pub async fn load_emails(path: &Path) -> Result<Vec<Email>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        AssistantError::ConfigError(format!("Failed to read emails from {:?}: {}", path, e))
    })?;
    let emails: Vec<Email> = serde_json::from_str(&content)?;
    info!("Loaded {} emails from {:?}", emails.len(), path);
    Ok(emails)
}

/// Score every email, highest priority first
pub fn score_emails(scorer: &PriorityScorer, emails: &[Email]) -> Vec<ScoreReport> {
    let mut reports: Vec<ScoreReport> = emails
        .iter()
        .map(|email| {
            let score = scorer.score(email);
            ScoreReport {
                email_id: email.id.clone(),
                from: email.from.clone(),
                subject: email.subject.clone(),
                total: score.total(),
                category: score.category(),
                breakdown: score.breakdown().clone(),
            }
        })
        .collect();
    reports.sort_by(|a, b| b.total.cmp(&a.total));
    reports
}

pub fn print_score_report(reports: &[ScoreReport]) {
    println!("\n========================================");
    println!("Priority Scores");
    println!("========================================");
    for report in reports {
        println!(
            "{:>3}/100 {:<8} {} - {}",
            report.total,
            report.category,
            truncate_string(&report.from, 30),
            truncate_string(&report.subject, 50)
        );
        for (component, points) in report.breakdown.iter().filter(|(_, p)| **p > 0) {
            println!("          {}: +{}", component, points);
        }
    }
    println!("========================================");
    println!("Emails scored: {}", reports.len());
}

pub fn print_audit_summary(summary: &AuditSummary) {
    println!("\n========================================");
    println!("Audit Summary (last {} days)", summary.days);
    println!("========================================");
    println!("Since: {}", summary.since.format("%Y-%m-%d %H:%M:%S"));
    for (action, count) in &summary.counts {
        println!("{:<22} {}", action, count);
    }
    println!("\nTriage decisions:");
    for (decision, count) in &summary.triage_decisions {
        println!("  {:<8} {}", decision, count);
    }
    println!("========================================");
}
