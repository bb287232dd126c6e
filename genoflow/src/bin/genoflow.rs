//! genoflow command-line interface.
//!
//! Inspect persisted workflows, or run the pipeline end-to-end with simulated
//! stages to see what parallel execution saves.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::filter::LevelFilter;

use genoflow::db::WorkflowFilter;
use genoflow::{
    Agent, AgentRegistry, HomeLayout, Orchestrator, OrchestratorOptions, StageError, StageInput,
    WorkflowStatus,
};
use genoflow_shared::constants::stages;

#[derive(Parser)]
#[command(name = "genoflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged genomic analysis workflow orchestrator")]
struct Cli {
    /// Home directory (overrides GENOFLOW_HOME and the config file)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Mirror debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workflows, newest first
    List {
        /// Only workflows in this status (e.g. completed, failed)
        #[arg(short, long)]
        status: Option<WorkflowStatus>,

        /// Only workflows started by this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show a workflow's full state
    Status { id: String },

    /// Show the results of a completed workflow
    Results { id: String },

    /// Delete a workflow that is not running
    Delete { id: String },

    /// Print the effective configuration
    Config,

    /// Run the pipeline with simulated stages
    Demo {
        /// Run literature and drug sequentially
        #[arg(long)]
        sequential: bool,

        /// Make the literature stage fail
        #[arg(long)]
        fail_literature: bool,

        /// User id recorded on the workflow
        #[arg(long, default_value = "demo")]
        user: String,
    },
}

/// Stand-in stage that sleeps and echoes what it saw.
struct SimulatedAgent {
    name: &'static str,
    delay: Duration,
    fail: bool,
}

impl SimulatedAgent {
    fn new(name: &'static str, delay_ms: u64) -> Self {
        Self {
            name,
            delay: Duration::from_millis(delay_ms),
            fail: false,
        }
    }

    fn failing(mut self, fail: bool) -> Self {
        self.fail = fail;
        self
    }
}

impl Agent for SimulatedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(StageError::new(
                "SimulatedFailure",
                format!("{} stage was told to fail", self.name),
            ));
        }
        Ok(json!({
            "stage": self.name,
            "simulated_ms": self.delay.as_millis() as u64,
            "upstream": input.upstream.keys().collect::<Vec<_>>(),
            "upstream_errors": input.upstream_errors,
        }))
    }
}

fn demo_registry(fail_literature: bool) -> Result<AgentRegistry> {
    let registry = AgentRegistry::new()
        .with(SimulatedAgent::new(stages::GENOMICS, 120))?
        .with(SimulatedAgent::new(stages::PROTEOMICS, 80))?
        .with(SimulatedAgent::new(stages::LITERATURE, 200).failing(fail_literature))?
        .with(SimulatedAgent::new(stages::DRUG, 300))?
        .with(SimulatedAgent::new(stages::DECISION, 40))?;
    Ok(registry)
}

fn load_options(cli: &Cli) -> Result<OrchestratorOptions> {
    let mut options = OrchestratorOptions::load().context("loading configuration")?;
    if let Some(ref home) = cli.home {
        options.home_dir = std::path::absolute(home)
            .with_context(|| format!("resolving {}", home.display()))?;
        options.sanitize()?;
    }
    Ok(options)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut options = load_options(&cli)?;

    let stderr_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let layout = HomeLayout::new(options.home_dir.clone());
    layout
        .prepare()
        .with_context(|| format!("preparing {}", layout.home_dir().display()))?;
    genoflow::init_logging(&layout, Some(stderr_level))?;

    let registry = match cli.command {
        Commands::Demo {
            sequential,
            fail_literature,
            ..
        } => {
            if sequential {
                options.enable_parallel_execution = false;
            }
            demo_registry(fail_literature)?
        }
        // Inspection commands never run stages.
        _ => demo_registry(false)?,
    };

    if let Commands::Config = cli.command {
        return print_json(&options);
    }

    let orchestrator = Orchestrator::new(options, registry)?;

    match cli.command {
        Commands::List { status, user } => {
            let filter = WorkflowFilter { status, user_id: user };
            let workflows = orchestrator.list_workflows(&filter)?;
            if workflows.is_empty() {
                println!("no workflows");
            }
            for wf in workflows {
                println!(
                    "{}  {:<22} {:>5.1}%  {}  user={}",
                    wf.workflow_id,
                    wf.status,
                    wf.progress_percentage,
                    wf.created_at.format("%Y-%m-%d %H:%M:%S"),
                    wf.user_id().unwrap_or("-"),
                );
            }
        }
        Commands::Status { id } => print_json(&orchestrator.get_status(&id)?)?,
        Commands::Results { id } => print_json(&orchestrator.get_results(&id)?)?,
        Commands::Delete { id } => {
            if !orchestrator.delete_workflow(&id)? {
                bail!("workflow {} not found", id);
            }
            println!("deleted {}", id);
        }
        Commands::Config => {}
        Commands::Demo { user, .. } => {
            let id = orchestrator.start(json!({
                "dna_sequence_file": "demo.fasta",
                "user_id": user,
            }))?;
            println!("workflow {}", id);

            let state = orchestrator.run(&id).await?;
            println!("status: {} ({:.0}%)", state.status, state.progress_percentage);
            for err in &state.errors {
                println!("error: [{}] {}: {}", err.agent, err.error_type, err.message);
            }

            if let Some(metrics) = orchestrator.get_execution_metrics(&id) {
                println!(
                    "group {:?} ({}): wall {}ms, sequential estimate {}ms, saved {}ms, efficiency {:.1}%",
                    metrics.agents_executed,
                    metrics.execution_mode,
                    metrics.total_execution_time.as_millis(),
                    metrics.sequential_time_estimate.as_millis(),
                    metrics.time_saved.as_millis(),
                    metrics.parallel_efficiency * 100.0,
                );
            }
            print_json(&orchestrator.get_performance_summary())?;
        }
    }

    Ok(())
}
