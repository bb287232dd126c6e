//! Orchestrator-wide counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free monotonic counters shared by the orchestrator and scheduler.
///
/// Counters never reset.
#[derive(Debug, Default)]
pub struct RuntimeMetricsStorage {
    pub(crate) workflows_started: AtomicU64,
    pub(crate) workflows_completed: AtomicU64,
    pub(crate) workflows_failed: AtomicU64,
    pub(crate) stage_invocations: AtomicU64,
    pub(crate) stage_failures: AtomicU64,
    pub(crate) groups_executed: AtomicU64,
}

impl RuntimeMetricsStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of [`RuntimeMetricsStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeMetrics {
    pub workflows_started: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub stage_invocations: u64,
    pub stage_failures: u64,
    pub groups_executed: u64,
}

impl RuntimeMetrics {
    pub fn snapshot(storage: &RuntimeMetricsStorage) -> Self {
        Self {
            workflows_started: storage.workflows_started.load(Ordering::Relaxed),
            workflows_completed: storage.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: storage.workflows_failed.load(Ordering::Relaxed),
            stage_invocations: storage.stage_invocations.load(Ordering::Relaxed),
            stage_failures: storage.stage_failures.load(Ordering::Relaxed),
            groups_executed: storage.groups_executed.load(Ordering::Relaxed),
        }
    }

    /// Workflows started but not yet finished either way.
    pub fn workflows_in_flight(&self) -> u64 {
        self.workflows_started
            .saturating_sub(self.workflows_completed + self.workflows_failed)
    }
}
