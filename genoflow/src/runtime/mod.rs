//! Orchestrator runtime: configuration, home layout, counters and the
//! per-run sequencer.

mod core;
mod layout;
mod metrics;
mod options;
mod sequencer;

pub use self::core::Orchestrator;
pub use layout::HomeLayout;
pub use metrics::{RuntimeMetrics, RuntimeMetricsStorage};
pub use options::{FailurePolicy, OrchestratorOptions, Persistence};
