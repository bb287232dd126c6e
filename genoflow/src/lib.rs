//! genoflow: workflow orchestration for staged genomic analysis.
//!
//! A workflow runs five stages (genomics → proteomics → {literature, drug} →
//! decision). Independent stages share a bounded worker pool, progress is
//! persisted after every group, and per-group timing metrics quantify what
//! parallel execution saved.
//!
//! ```no_run
//! use genoflow::{AgentRegistry, Orchestrator, OrchestratorOptions};
//! # fn registry() -> AgentRegistry { AgentRegistry::new() }
//! # async fn demo() -> genoflow::GenoflowResult<()> {
//! let orchestrator = Orchestrator::new(OrchestratorOptions::load()?, registry())?;
//! let id = orchestrator.start(serde_json::json!({"dna_sequence_file": "sample.fasta"}))?;
//! let state = orchestrator.run(&id).await?;
//! println!("{} finished as {}", id, state.status);
//! # Ok(())
//! # }
//! ```

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub mod agent;
pub mod cache;
pub mod db;
pub mod pipeline;
pub mod runtime;
pub mod workflow;

pub use agent::{Agent, AgentRegistry, CachedAgent, StageError, StageInput};
pub use cache::{CacheType, MemoryCache, StageCache};
pub use db::{WorkflowFilter, WorkflowStore};
pub use genoflow_shared::{GenoflowError, GenoflowResult};
pub use pipeline::{
    AgentExecutionResult, ExecutionMode, ParallelExecutionMetrics, PerformanceSummary,
};
pub use runtime::{
    FailurePolicy, HomeLayout, Orchestrator, OrchestratorOptions, Persistence, RuntimeMetrics,
};
pub use workflow::{WorkflowError, WorkflowId, WorkflowState, WorkflowStatus};

/// Holds the file writer's guard for the life of the process. `None` when
/// another subscriber was already installed.
static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Install file logging under `<home>/logs`. First call wins.
pub fn init_logging_for(layout: &HomeLayout) -> GenoflowResult<()> {
    init_logging(layout, None)
}

/// Install file logging, optionally mirrored to stderr at `stderr_level`.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` (or `stderr_level`
/// when that is more verbose). If a global
/// subscriber is already set (by an earlier call or by the host
/// application) this is a no-op.
pub fn init_logging(layout: &HomeLayout, stderr_level: Option<LevelFilter>) -> GenoflowResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("genoflow.log")
        .build(layout.logs_dir())
        .map_err(|e| {
            GenoflowError::Storage(format!(
                "Failed to open log directory {}: {}",
                layout.logs_dir().display(),
                e
            ))
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let default_level = match stderr_level {
        Some(level) if level > LevelFilter::INFO => level,
        _ => LevelFilter::INFO,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
    let stderr_layer = stderr_level.map(|level| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(level)
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    let _ = LOG_GUARD.set(installed.then_some(guard));
    if installed {
        tracing::debug!(logs_dir = %layout.logs_dir().display(), "Logging initialized");
    }
    Ok(())
}
