use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use maestro::agent::{AgentProfile, Capability};
use maestro::config::EngineConfig;
use maestro::orchestration::templates::TemplateLibrary;
use maestro::orchestration::{OrchestrationController, ANALYZE_CAPABILITY};
use maestro::plugin::{CapabilityExecutor, CompletenessScorer, EchoExecutor, SchemaConformanceScorer};
use maestro::state::SnapshotStore;
use maestro::task::TaskSpec;
use maestro::{mlog, Result};

/// Maestro - multi-agent task orchestration and consensus engine
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MAESTRO_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.maestro/maestro.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit a task to the demo agent pool and print the final report
    Run {
        /// The task description in natural language
        description: String,

        /// Context entries as key=value pairs
        #[arg(short = 'c', long = "context")]
        context: Vec<String>,

        /// Wall-clock deadline in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// List the decomposition templates the engine matches against
    Templates,
}

/// Demo planner for the hierarchical fallback: turns any analysis request
/// into a two-step plan.
struct DemoPlanner;

#[async_trait]
impl CapabilityExecutor for DemoPlanner {
    fn capabilities(&self) -> HashSet<Capability> {
        [Capability::new(ANALYZE_CAPABILITY)].into_iter().collect()
    }

    async fn execute(
        &self,
        _capability: &Capability,
        payload: &Value,
        _cancel: CancellationToken,
    ) -> Result<Value> {
        Ok(serde_json::json!([
            {
                "name": "produce-artifact",
                "capability": "codegen",
                "payload": {"request": payload},
            },
            {
                "name": "describe-artifact",
                "capability": "docgen",
                "payload": {"request": payload},
            },
        ]))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    maestro::log::init_with_debug(cli.debug);

    let config = EngineConfig::load()?;

    match cli.command {
        Command::Run {
            description,
            context,
            deadline_secs,
        } => run_task(config, &description, &context, deadline_secs).await,
        Command::Templates => {
            let library = TemplateLibrary::from_config(&config.templates);
            for template in library.templates() {
                let shape = if template.parallel { "parallel" } else { "sequential" };
                println!("{} ({})", template.name, shape);
                println!("  keywords: {}", template.keywords.join(", "));
                for step in &template.steps {
                    let mode = if step.competitive { " [competitive]" } else { "" };
                    println!("  - {} -> {}{}", step.name, step.capability, mode);
                }
            }
            Ok(())
        }
    }
}

async fn run_task(
    config: EngineConfig,
    description: &str,
    context: &[String],
    deadline_secs: Option<u64>,
) -> Result<()> {
    let (mut controller, mut registry_events) = OrchestrationController::new(
        config.clone(),
        vec![Arc::new(SchemaConformanceScorer), Arc::new(CompletenessScorer)],
    );
    controller.set_store(SnapshotStore::open(&config)?);
    let controller = Arc::new(controller);

    // Surface registry events in the log
    tokio::spawn(async move {
        while let Some(event) = registry_events.recv().await {
            mlog!("registry event: {:?}", event);
        }
    });

    // Demo pool: two generalists plus a planner for the hierarchical path
    let worker_caps = vec![
        Capability::new("design"),
        Capability::new("codegen"),
        Capability::new("testgen"),
        Capability::new("docgen"),
        Capability::new("security"),
        Capability::new("analysis"),
    ];
    for name in ["alpha", "beta"] {
        controller
            .register_agent(
                AgentProfile::new(name, worker_caps.clone(), 4),
                Arc::new(EchoExecutor::new(worker_caps.clone())),
            )
            .await;
    }
    controller
        .register_agent(
            AgentProfile::new("planner", [Capability::new(ANALYZE_CAPABILITY)], 2),
            Arc::new(DemoPlanner),
        )
        .await;

    let mut spec = TaskSpec::new(description);
    for entry in context {
        match entry.split_once('=') {
            Some((key, value)) => {
                spec = spec.with_context(key, value);
            }
            None => {
                eprintln!("ignoring malformed context entry (expected key=value): {}", entry);
            }
        }
    }
    if let Some(secs) = deadline_secs {
        spec = spec.with_deadline(Duration::from_secs(secs));
    }

    let task_id = controller.submit(spec);
    println!("submitted task {}", task_id);

    let report = controller.wait(&task_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    controller.shutdown().await;
    Ok(())
}
