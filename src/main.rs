//! Sentinel CLI - run health checks and manage alert feedback
//!
//! Thin front-end over the library: loads configuration, wires the agent
//! pool to a device, and renders the prioritized report as plain text.

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nas_sentinel::{
    init_logging, standard_agents, AppConfig, ApplianceClient, ContextValue, DsmClient, Feedback,
    FeedbackKind, LearningAgent, LoggingConfig, MemoryStore, MockClient, Orchestrator, Priority,
};

#[derive(Parser)]
#[command(name = "sentinel-cli", version, about = "Multi-agent NAS health monitor")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device name from the configuration
    #[arg(short, long)]
    device: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all agents and print the health report
    Check {
        /// Include info-level findings in the report
        #[arg(long)]
        show_info: bool,
        /// Use canned records instead of contacting an appliance
        #[arg(long)]
        offline: bool,
    },
    /// Print per-agent learning status
    Learning,
    /// Record user feedback on a past alert
    Feedback {
        /// Agent that produced the alert (e.g. storage)
        agent: String,
        /// Alert type the feedback applies to (e.g. storage_warning)
        alert_type: String,
        /// One of: useful, false_positive, too_late, too_sensitive
        kind: String,
        /// Alert context as key=value pairs
        context: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig {
        json_format: cli.json_logs,
        ..Default::default()
    })?;

    let config = AppConfig::load(cli.config.as_deref())?;
    let device_name = cli.device.as_deref();
    let memory = Arc::new(MemoryStore::new(config.device_data_dir(device_name))?);

    match cli.command {
        Command::Check { show_info, offline } => {
            let (client, dsm): (Arc<dyn ApplianceClient>, Option<Arc<DsmClient>>) = if offline {
                (Arc::new(MockClient::default()), None)
            } else {
                let device = config.device(device_name)?;
                let dsm = Arc::new(DsmClient::new(
                    &device.host,
                    device.port,
                    device.https,
                    &device.username,
                    &device.password,
                    Duration::from_secs(device.timeout_secs),
                )?);
                dsm.connect()
                    .await
                    .with_context(|| format!("connecting to {}", device.host))?;
                (dsm.clone(), Some(dsm))
            };

            let mut orchestrator = Orchestrator::new();
            orchestrator.register_agents(standard_agents(client, memory));
            let feedback = orchestrator.check_health(show_info).await;
            render_report(&feedback, show_info);

            if let Some(dsm) = dsm {
                dsm.disconnect().await;
            }
        }
        Command::Learning => {
            for name in ["storage", "disks", "backup", "security", "logs", "updates"] {
                let status = LearningAgent::new(name, memory.clone()).learning_status();
                println!(
                    "{:<10} baselines={:<4} patterns={:<4} active={:<4} observations={}",
                    status.agent,
                    status.baselines_learned,
                    status.patterns_learned,
                    status.active_patterns,
                    status.total_observations,
                );
            }
        }
        Command::Feedback {
            agent,
            alert_type,
            kind,
            context,
        } => {
            let kind = parse_feedback_kind(&kind)?;
            let context = parse_context_pairs(&context)?;
            LearningAgent::new(agent.as_str(), memory)
                .receive_user_feedback(&alert_type, kind, Some(context))?;
            println!("Feedback recorded for {}/{}", agent, alert_type);
        }
    }

    Ok(())
}

fn parse_feedback_kind(kind: &str) -> anyhow::Result<FeedbackKind> {
    match kind {
        "useful" => Ok(FeedbackKind::Useful),
        "false_positive" => Ok(FeedbackKind::FalsePositive),
        "too_late" => Ok(FeedbackKind::TooLate),
        "too_sensitive" => Ok(FeedbackKind::TooSensitive),
        other => bail!(
            "unknown feedback kind '{}' (expected useful, false_positive, too_late or too_sensitive)",
            other
        ),
    }
}

fn parse_context_pairs(pairs: &[String]) -> anyhow::Result<nas_sentinel::Context> {
    let mut context = nas_sentinel::Context::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("context entry '{}' is not key=value", pair))?;
        context.insert(key.to_string(), parse_scalar(value));
    }
    Ok(context)
}

fn parse_scalar(value: &str) -> ContextValue {
    if let Ok(v) = value.parse::<bool>() {
        return ContextValue::from(v);
    }
    if let Ok(v) = value.parse::<i64>() {
        return ContextValue::from(v);
    }
    if let Ok(v) = value.parse::<f64>() {
        return ContextValue::from(v);
    }
    ContextValue::from(value)
}

fn render_report(feedback: &[Feedback], show_info: bool) {
    println!();
    println!("=== NAS SENTINEL - Health Report ===");
    println!();

    if feedback.is_empty() {
        println!("No alerts. All clear.");
        return;
    }

    for priority in Priority::ALL {
        if priority == Priority::Info && !show_info {
            continue;
        }
        let items: Vec<&Feedback> = feedback.iter().filter(|f| f.priority == priority).collect();
        if items.is_empty() {
            continue;
        }

        println!("{} (P{})", priority.label(), priority as u8);
        for item in items {
            println!("  * {}", item);
            if let Some(details) = &item.details {
                println!("      {}", details);
            }
        }
        println!();
    }
}
