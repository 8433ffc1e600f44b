use anyhow::Result;
use clap::Parser;
use exec_assistant::audit::{AuditSink, JsonlAuditLog};
use exec_assistant::cli::{self, Cli, Commands};
use exec_assistant::config::Config;
use exec_assistant::error::AssistantError;
use exec_assistant::priority::PriorityScorer;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: exec-assistant --help");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("exec_assistant=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("exec_assistant=info,warn,error"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Score { input } => {
            let config = Config::load(&cli.config).await?;
            let scorer = PriorityScorer::new(&config.assistant.vip_contacts);
            let emails = cli::load_emails(&input).await?;
            let reports = cli::score_emails(&scorer, &emails);
            cli::print_score_report(&reports);
            Ok(())
        }

        Commands::AuditSummary { log, days } => {
            let audit = JsonlAuditLog::new(&log);
            let summary = audit.summary(days).await?;
            cli::print_audit_summary(&summary);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(AssistantError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - assistant.name / full_name: Who the assistant works for");
            println!("  - assistant.vip_contacts: Senders that always score high");
            println!("  - assistant.triage_*: Rules for ignoring, answering or notifying");
            println!("  - resilience.services.*: Retry, breaker and rate limits per dependency");

            Ok(())
        }

        Commands::CheckConfig => {
            let config = Config::load(&cli.config).await?;
            config.validate()?;

            println!("Configuration OK: {:?}", cli.config);
            println!("Assistant: {} ({})", config.assistant.full_name, config.assistant.assistant_id);
            println!("VIP contacts: {}", config.assistant.vip_contacts.len());
            println!("Drafting attempts: {}", config.drafting.max_attempts);
            for (name, service) in &config.resilience.services {
                println!(
                    "  {:<10} attempts={} breaker={}/{}s rate_limit={}",
                    name,
                    service.retry.max_attempts,
                    service.circuit_breaker.failure_threshold,
                    service.circuit_breaker.recovery_timeout_secs,
                    service
                        .rate_limit_per_minute
                        .map(|limit| format!("{}/min", limit))
                        .unwrap_or_else(|| "none".to_string())
                );
            }

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {}", cause);
    }

    if let Some(err) = error.downcast_ref::<AssistantError>() {
        match err {
            AssistantError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: exec-assistant init-config --force");
            }
            AssistantError::SerializationError(_) => {
                eprintln!("\nHint: The input must be a JSON array of emails with");
                eprintln!("      id, thread_id, from, to, subject, body and timestamp fields.");
            }
            _ => {}
        }
    }
}
