//! Constants shared between the orchestrator and tooling.

/// Stage names of the fixed analysis pipeline.
pub mod stages {
    pub const GENOMICS: &str = "genomics";
    pub const PROTEOMICS: &str = "proteomics";
    pub const LITERATURE: &str = "literature";
    pub const DRUG: &str = "drug";
    pub const DECISION: &str = "decision";

    /// Pipeline order. Progress percentages are derived from positions here.
    pub const ORDER: [&str; 5] = [GENOMICS, PROTEOMICS, LITERATURE, DRUG, DECISION];
}

/// Agent name used for errors raised by the orchestrator itself.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

/// Key of the aggregate entry written into `results` on completion.
pub const FINAL_RESULTS_KEY: &str = "final";

/// Default bound on concurrently executing stage invocations.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Environment variables read by `OrchestratorOptions`.
pub mod env {
    pub const CONFIG: &str = "GENOFLOW_CONFIG";
    pub const HOME: &str = "GENOFLOW_HOME";
    pub const MAX_WORKERS: &str = "GENOFLOW_MAX_WORKERS";
    pub const PARALLEL: &str = "GENOFLOW_PARALLEL";
    pub const TASK_TIMEOUT_SECS: &str = "GENOFLOW_TASK_TIMEOUT_SECS";
    pub const FAILURE_POLICY: &str = "GENOFLOW_FAILURE_POLICY";
}
