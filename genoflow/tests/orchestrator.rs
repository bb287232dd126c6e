//! End-to-end orchestrator behavior with in-test agents.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use genoflow::db::MemoryWorkflowStore;
use genoflow::{
    Agent, AgentRegistry, ExecutionMode, FailurePolicy, GenoflowError, GenoflowResult,
    Orchestrator, OrchestratorOptions, Persistence, StageError, StageInput, WorkflowFilter,
    WorkflowId, WorkflowState, WorkflowStatus, WorkflowStore,
};
use genoflow_shared::constants::stages;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Sleeps for `delay`, then succeeds or fails. Records the upstream errors it saw.
struct StubAgent {
    name: &'static str,
    delay: Duration,
    fail: bool,
    seen_upstream_errors: Arc<Mutex<HashSet<String>>>,
}

impl Agent for StubAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
        std::thread::sleep(self.delay);
        self.seen_upstream_errors
            .lock()
            .extend(input.upstream_errors.keys().cloned());
        if self.fail {
            return Err(StageError::new("HttpError", format!("{} backend unavailable", self.name)));
        }
        Ok(json!({"stage": self.name, "input": input.input_data}))
    }
}

struct Setup {
    delays_ms: [u64; 5],
    failing: Vec<&'static str>,
    parallel: bool,
    policy: FailurePolicy,
    timeout_secs: Option<u64>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            delays_ms: [5, 5, 100, 150, 5],
            failing: Vec::new(),
            parallel: true,
            policy: FailurePolicy::Continue,
            timeout_secs: None,
        }
    }
}

struct Fixture {
    _dir: TempDir,
    orchestrator: Orchestrator,
    seen_upstream_errors: Arc<Mutex<HashSet<String>>>,
}

/// Memory store whose writes start failing after `saves_left` succeed.
struct FlakyStore {
    inner: MemoryWorkflowStore,
    saves_left: AtomicUsize,
}

impl FlakyStore {
    fn failing_after(saves: usize) -> Self {
        Self {
            inner: MemoryWorkflowStore::new(),
            saves_left: AtomicUsize::new(saves),
        }
    }
}

impl WorkflowStore for FlakyStore {
    fn save(&self, state: &WorkflowState) -> GenoflowResult<()> {
        let allowed = self
            .saves_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(GenoflowError::Database("disk I/O error".into()));
        }
        self.inner.save(state)
    }

    fn load(&self, id: &WorkflowId) -> GenoflowResult<Option<WorkflowState>> {
        self.inner.load(id)
    }

    fn list(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>> {
        self.inner.list(filter)
    }

    fn delete(&self, id: &WorkflowId) -> GenoflowResult<bool> {
        self.inner.delete(id)
    }
}

fn registry(setup: &Setup, seen: &Arc<Mutex<HashSet<String>>>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for (stage, delay) in stages::ORDER.iter().zip(setup.delays_ms) {
        registry
            .register(StubAgent {
                name: stage,
                delay: Duration::from_millis(delay),
                fail: setup.failing.contains(stage),
                seen_upstream_errors: Arc::clone(seen),
            })
            .unwrap();
    }
    registry
}

fn fixture(setup: Setup) -> Fixture {
    let dir = TempDir::new().unwrap();
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let registry = registry(&setup, &seen);

    let mut options = OrchestratorOptions::with_home(dir.path());
    options.enable_parallel_execution = setup.parallel;
    options.failure_policy = setup.policy;
    options.task_timeout_secs = setup.timeout_secs;

    Fixture {
        orchestrator: Orchestrator::new(options, registry).unwrap(),
        _dir: dir,
        seen_upstream_errors: seen,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completes_and_reports_parallel_savings() {
    let f = fixture(Setup::default());
    let id = f
        .orchestrator
        .start(json!({"dna_sequence_file": "a.fasta", "user_id": "u1"}))
        .unwrap();
    let state = f.orchestrator.run(&id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.progress_percentage, 100.0);
    assert!(state.errors.is_empty());
    for stage in stages::ORDER {
        assert!(state.results.contains_key(stage), "missing {}", stage);
    }
    assert_eq!(state.results[stages::GENOMICS]["input"]["dna_sequence_file"], "a.fasta");

    let metrics = f.orchestrator.get_execution_metrics(&id).unwrap();
    assert_eq!(metrics.agents_executed, vec![stages::LITERATURE, stages::DRUG]);
    assert_eq!(metrics.execution_mode, ExecutionMode::Parallel);
    assert!(metrics.sequential_time_estimate >= Duration::from_millis(250));
    assert!(metrics.time_saved > Duration::ZERO);
    assert!(metrics.parallel_efficiency > 0.0 && metrics.parallel_efficiency < 1.0);
    assert_eq!(f.orchestrator.get_group_metrics(&id).len(), 4);

    let summary = f.orchestrator.get_performance_summary();
    assert_eq!(summary.total_workflows, 1);
    assert!(summary.parallel_execution_enabled);
    assert_eq!(summary.total_time_saved, metrics.time_saved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_group_member_does_not_fail_workflow() {
    let f = fixture(Setup {
        failing: vec![stages::LITERATURE],
        ..Setup::default()
    });
    let id = f.orchestrator.start(json!({})).unwrap();
    let state = f.orchestrator.run(&id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert!(state.results.contains_key(stages::DRUG));
    assert!(!state.results.contains_key(stages::LITERATURE));
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].agent, stages::LITERATURE);
    assert_eq!(state.errors[0].error_type, "HttpError");

    let final_results = &state.results["final"];
    assert_eq!(final_results["failed_stages"], json!([stages::LITERATURE]));

    // The decision stage was told literature failed.
    assert!(f.seen_upstream_errors.lock().contains(stages::LITERATURE));

    let metrics = f.orchestrator.get_execution_metrics(&id).unwrap();
    assert_eq!(metrics.failed().count(), 1);
    assert_eq!(metrics.succeeded().count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_only_after_completion() {
    let f = fixture(Setup::default());
    let id = f.orchestrator.start(json!({})).unwrap();

    assert!(matches!(
        f.orchestrator.get_results(&id),
        Err(GenoflowError::InvalidState(_))
    ));

    f.orchestrator.run(&id).await.unwrap();
    let results = f.orchestrator.get_results(&id).unwrap();
    assert!(results.contains_key("final"));
    assert_eq!(results["final"]["decision"]["stage"], stages::DECISION);
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let f = fixture(Setup::default());
    assert!(matches!(
        f.orchestrator.get_status("unknown-id"),
        Err(GenoflowError::NotFound(_))
    ));
    assert!(matches!(
        f.orchestrator.run("unknown-id").await,
        Err(GenoflowError::NotFound(_))
    ));
    assert!(f.orchestrator.get_execution_metrics("unknown-id").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_twice_is_invalid_state() {
    let f = fixture(Setup::default());
    let id = f.orchestrator.start(json!({})).unwrap();

    let background = {
        let orchestrator = f.orchestrator.clone();
        let id = id.clone();
        tokio::spawn(async move { orchestrator.run(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(matches!(
        f.orchestrator.run(&id).await,
        Err(GenoflowError::InvalidState(_))
    ));
    assert!(matches!(
        f.orchestrator.delete_workflow(&id),
        Err(GenoflowError::InvalidState(_))
    ));

    let state = background.await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);

    assert!(matches!(
        f.orchestrator.run(&id).await,
        Err(GenoflowError::InvalidState(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_disabled_reports_zero_savings() {
    let f = fixture(Setup {
        parallel: false,
        ..Setup::default()
    });
    let state = f.orchestrator.execute(json!({})).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);

    let metrics = f
        .orchestrator
        .get_execution_metrics(&state.workflow_id)
        .unwrap();
    assert_eq!(metrics.execution_mode, ExecutionMode::Sequential);
    assert_eq!(metrics.time_saved, Duration::ZERO);
    assert_eq!(metrics.parallel_efficiency, 0.0);
    assert!(metrics.total_execution_time >= Duration::from_millis(250));

    let summary = f.orchestrator.get_performance_summary();
    assert!(!summary.parallel_execution_enabled);
    assert_eq!(summary.average_efficiency, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_stops_after_failed_group() {
    let f = fixture(Setup {
        failing: vec![stages::PROTEOMICS],
        policy: FailurePolicy::FailFast,
        ..Setup::default()
    });
    let state = f.orchestrator.execute(json!({})).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(!state.results.contains_key(stages::LITERATURE));
    assert_eq!(state.progress_percentage, 20.0);
    let last = state.errors.last().unwrap();
    assert_eq!(last.agent, "orchestrator");
    assert_eq!(last.error_type, "StageFailed");
    assert_eq!(f.orchestrator.runtime_metrics().workflows_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_decision_fails_workflow() {
    let f = fixture(Setup {
        failing: vec![stages::DECISION],
        ..Setup::default()
    });
    let state = f.orchestrator.execute(json!({})).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(state.progress_percentage < 100.0);
    assert!(!state.results.contains_key("final"));
    let agents: Vec<&str> = state.errors.iter().map(|e| e.agent.as_str()).collect();
    assert_eq!(agents, vec![stages::DECISION, "orchestrator"]);
    assert!(matches!(
        f.orchestrator.get_results(&state.workflow_id),
        Err(GenoflowError::InvalidState(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_stage_is_recorded() {
    let f = fixture(Setup {
        delays_ms: [5, 5, 1_500, 10, 5],
        timeout_secs: Some(1),
        ..Setup::default()
    });
    let state = f.orchestrator.execute(json!({})).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    let timeout = state
        .errors_for(stages::LITERATURE)
        .next()
        .expect("literature timeout recorded");
    assert_eq!(timeout.error_type, "Timeout");
    assert!(state.results.contains_key(stages::DRUG));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workflows_are_independent() {
    let f = fixture(Setup {
        delays_ms: [5, 5, 30, 30, 5],
        ..Setup::default()
    });

    let runs: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = f.orchestrator.clone();
            tokio::spawn(async move { orchestrator.execute(json!({"user_id": format!("u{}", i)})).await })
        })
        .collect();

    let mut ids = HashSet::new();
    for run in runs {
        let state = run.await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        ids.insert(state.workflow_id);
    }
    assert_eq!(ids.len(), 4);

    let listed = f
        .orchestrator
        .list_workflows(&genoflow::WorkflowFilter::default().with_status(WorkflowStatus::Completed))
        .unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(f.orchestrator.get_performance_summary().total_workflows, 4);
    assert_eq!(f.orchestrator.runtime_metrics().workflows_completed, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_persistence_runs_without_database() {
    let dir = TempDir::new().unwrap();
    let mut registry = AgentRegistry::new();
    let seen = Arc::new(Mutex::new(HashSet::new()));
    for stage in stages::ORDER {
        registry
            .register(StubAgent {
                name: stage,
                delay: Duration::ZERO,
                fail: false,
                seen_upstream_errors: Arc::clone(&seen),
            })
            .unwrap();
    }
    let mut options = OrchestratorOptions::with_home(dir.path());
    options.persistence = Persistence::Memory;

    let orchestrator = Orchestrator::new(options, registry).unwrap();
    let state = orchestrator.execute(json!({})).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert!(!dir.path().join("db/genoflow.db").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_failure_aborts_run_without_partial_state() {
    let dir = TempDir::new().unwrap();
    let seen = Arc::new(Mutex::new(HashSet::new()));
    // register, genomics dispatch, genomics result; proteomics dispatch fails.
    let store = Arc::new(FlakyStore::failing_after(3));
    let orchestrator = Orchestrator::with_store(
        OrchestratorOptions::with_home(dir.path()),
        registry(&Setup::default(), &seen),
        store.clone(),
    )
    .unwrap();

    let id = orchestrator.start(json!({})).unwrap();
    let err = orchestrator.run(&id).await.unwrap_err();
    assert!(matches!(err, GenoflowError::Database(_)), "got {:?}", err);
    assert!(err.is_persistence());

    // The failed write left neither the cache nor the store ahead.
    let state = orchestrator.get_status(&id).unwrap();
    assert_eq!(state.status, WorkflowStatus::GenomicsProcessing);
    assert_eq!(state.progress_percentage, 20.0);
    assert!(state.results.contains_key(stages::GENOMICS));
    assert!(!state.results.contains_key(stages::PROTEOMICS));
    assert_eq!(store.load(&id).unwrap().unwrap(), state);

    let counters = orchestrator.runtime_metrics();
    assert_eq!(counters.workflows_failed, 1);
    assert_eq!(counters.workflows_completed, 0);
}
