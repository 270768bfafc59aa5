//! `maestro`: list, validate and dry-run workflow definitions.

mod config;
mod echo;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{parse_config, CliConfig};
use echo::EchoExecutor;
use maestro_bus::CommunicationBus;
use maestro_core::ExecutorRegistry;
use maestro_orchestrator::{
    default_workflows, ExecutionSnapshot, WorkflowDefinition, WorkflowEngine,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro: multi-agent task and workflow orchestration")]
struct Cli {
    /// Path to config file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in and configured workflows
    List,
    /// Validate every configured workflow definition
    Validate,
    /// Run a workflow against echo executors and print the final state
    Run {
        /// Workflow id
        workflow: String,
        /// Input data as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
        /// Organization id passed to every step
        #[arg(long, default_value = "local")]
        org: String,
        /// Artificial latency of each echo executor call, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

/// Built-in templates followed by the configured workflows, which replace
/// built-ins of the same id.
fn all_workflows(config: &CliConfig) -> Vec<WorkflowDefinition> {
    let mut workflows = default_workflows();
    for def in &config.workflows {
        workflows.retain(|w| w.id != def.id);
        workflows.push(def.clone());
    }
    workflows
}

fn agent_types(workflows: &[WorkflowDefinition]) -> BTreeSet<String> {
    workflows
        .iter()
        .flat_map(|w| w.steps.iter().map(|s| s.agent_type.clone()))
        .collect()
}

async fn wait_for_completion(
    engine: &WorkflowEngine,
    execution_id: Uuid,
) -> anyhow::Result<ExecutionSnapshot> {
    loop {
        let snapshot = engine.get_execution_status(execution_id)?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => parse_config(path)?,
        None => CliConfig::default(),
    };

    match cli.command {
        Commands::List => {
            let workflows = all_workflows(&config);
            println!("Workflows:");
            for def in &workflows {
                let summary = def.summary();
                println!(
                    "  {} v{} ({} steps): {}",
                    summary.workflow_id, summary.version, summary.steps_count, summary.name
                );
                if !summary.description.is_empty() {
                    println!("    {}", summary.description);
                }
            }
            println!("\nTotal: {} workflow(s)", workflows.len());
        }
        Commands::Validate => {
            let mut failures = 0usize;
            for def in &config.workflows {
                match def.validate() {
                    Ok(()) => println!("  ok      {}", def.id),
                    Err(e) => {
                        failures += 1;
                        println!("  invalid {}: {e}", def.id);
                    }
                }
            }
            if config.workflows.is_empty() {
                println!("No workflows configured. Declare them under [[workflows]].");
            }
            if failures > 0 {
                anyhow::bail!("{failures} workflow definition(s) failed validation");
            }
        }
        Commands::Run {
            workflow,
            input,
            org,
            delay_ms,
        } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let workflows = all_workflows(&config);

            let executors = Arc::new(ExecutorRegistry::new());
            for agent_type in agent_types(&workflows) {
                executors.register(
                    agent_type.clone(),
                    Arc::new(EchoExecutor::new(agent_type, Duration::from_millis(delay_ms))),
                );
            }

            info!(
                agent_types = ?executors.agent_types(),
                "Echo executors registered"
            );

            let bus = Arc::new(CommunicationBus::new(config.runtime.bus.clone()));
            let engine = Arc::new(
                WorkflowEngine::new(config.runtime.engine.clone(), executors)
                    .with_bus(Arc::clone(&bus)),
            );
            for def in workflows {
                let id = def.id.clone();
                if let Err(e) = engine.register_workflow(def) {
                    warn!(workflow_id = %id, error = %e, "Skipping invalid workflow");
                }
            }

            let execution_id = engine.execute_workflow(&workflow, input, &org, None)?;
            info!(execution_id = %execution_id, workflow_id = %workflow, "Dry run started");

            let snapshot = wait_for_completion(&engine, execution_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);

            let stats = bus.get_stats();
            info!(
                shared_data = stats.shared_data_entries,
                messages_sent = stats.messages_sent,
                "Bus activity during dry run"
            );
            engine.shutdown().await;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use maestro_orchestrator::WorkflowStep;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "maestro",
            "run",
            "content_pipeline",
            "--input",
            r#"{"topic":"rust"}"#,
            "--delay-ms",
            "5",
        ])
        .unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Run {
                workflow,
                input,
                org,
                delay_ms,
            } => {
                assert_eq!(workflow, "content_pipeline");
                assert_eq!(input, r#"{"topic":"rust"}"#);
                assert_eq!(org, "local");
                assert_eq!(delay_ms, 5);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_configured_workflow_replaces_builtin() {
        let custom = WorkflowDefinition::new(
            "content_pipeline",
            "Short pipeline",
            vec![WorkflowStep::new("draft", "writer", "write_draft")],
        );
        let config = CliConfig {
            workflows: vec![custom],
            ..CliConfig::default()
        };

        let workflows = all_workflows(&config);
        assert_eq!(workflows.len(), 2);
        let pipeline = workflows.iter().find(|w| w.id == "content_pipeline").unwrap();
        assert_eq!(pipeline.name, "Short pipeline");

        let types = agent_types(&workflows);
        assert!(types.contains("writer"));
        assert!(types.contains("analytics"));
        assert!(!types.contains("research"));
    }

    #[tokio::test]
    async fn test_dry_run_completes_with_echo_executors() {
        let workflows = default_workflows();
        let executors = Arc::new(ExecutorRegistry::new());
        for agent_type in agent_types(&workflows) {
            executors.register(
                agent_type.clone(),
                Arc::new(EchoExecutor::new(agent_type, Duration::ZERO)),
            );
        }
        let engine = Arc::new(WorkflowEngine::new(
            maestro_core::EngineConfig::default(),
            executors,
        ));
        for def in workflows {
            engine.register_workflow(def).unwrap();
        }

        let id = engine
            .execute_workflow(
                "content_pipeline",
                serde_json::json!({"topic": "rust"}),
                "local",
                None,
            )
            .unwrap();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_completion(&engine, id),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(snapshot.status, maestro_orchestrator::ExecutionStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert!(snapshot.final_result.is_some());
    }
}
