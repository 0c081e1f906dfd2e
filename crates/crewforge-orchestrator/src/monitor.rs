use async_trait::async_trait;
use crewforge_agent::ExchangeObserver;
use crewforge_core::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Per-worker metrics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Backend requests sent.
    pub requests: u64,
    /// Total time spent waiting on the worker's rate limit.
    pub throttled_ms: u64,
    /// Tool calls made.
    pub tool_calls: u64,
    /// Tool calls that failed or timed out.
    pub tool_failures: u64,
    /// Tasks handed to a subordinate.
    pub delegations_sent: u64,
    /// Tasks received from a delegator.
    pub delegations_received: u64,
    /// Assigned tasks that completed.
    pub tasks_completed: u64,
    /// Assigned tasks that failed.
    pub tasks_failed: u64,
    /// Wall time of the tasks assigned to this worker.
    pub busy_ms: u64,
}

/// Snapshot of one worker's activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerActivity {
    /// The worker described.
    pub worker: WorkerId,
    /// Tasks currently assigned to the worker and running.
    pub active_tasks: u32,
    /// Counters for the run so far.
    pub metrics: WorkerMetrics,
}

/// Tracks activity and metrics for every worker of a run.
pub struct WorkerMonitor {
    states: Arc<RwLock<BTreeMap<WorkerId, WorkerActivity>>>,
}

impl WorkerMonitor {
    /// Start tracking the given workers with zeroed metrics.
    pub fn new<'a>(workers: impl IntoIterator<Item = &'a WorkerId>) -> Self {
        let states = workers
            .into_iter()
            .map(|id| {
                (
                    id.clone(),
                    WorkerActivity {
                        worker: id.clone(),
                        active_tasks: 0,
                        metrics: WorkerMetrics::default(),
                    },
                )
            })
            .collect();
        Self {
            states: Arc::new(RwLock::new(states)),
        }
    }

    /// Mark a worker as starting a task.
    pub async fn start_task(&self, worker: &WorkerId) {
        self.update(worker, |state| state.active_tasks += 1).await;
    }

    /// Mark a worker's task as finished.
    pub async fn finish_task(&self, worker: &WorkerId, succeeded: bool, elapsed: Duration) {
        self.update(worker, |state| {
            state.active_tasks = state.active_tasks.saturating_sub(1);
            if succeeded {
                state.metrics.tasks_completed += 1;
            } else {
                state.metrics.tasks_failed += 1;
            }
            state.metrics.busy_ms += duration_ms(elapsed);
        })
        .await;
    }

    /// Snapshot of every worker, sorted by id.
    pub async fn snapshot(&self) -> Vec<WorkerActivity> {
        self.states.read().await.values().cloned().collect()
    }

    /// Snapshot of one worker's activity.
    pub async fn get(&self, worker: &WorkerId) -> Option<WorkerActivity> {
        self.states.read().await.get(worker).cloned()
    }

    /// Metrics summed over all workers.
    pub async fn aggregate_metrics(&self) -> WorkerMetrics {
        let states = self.states.read().await;
        let mut total = WorkerMetrics::default();
        for state in states.values() {
            let m = &state.metrics;
            total.requests += m.requests;
            total.throttled_ms += m.throttled_ms;
            total.tool_calls += m.tool_calls;
            total.tool_failures += m.tool_failures;
            total.delegations_sent += m.delegations_sent;
            total.delegations_received += m.delegations_received;
            total.tasks_completed += m.tasks_completed;
            total.tasks_failed += m.tasks_failed;
            total.busy_ms += m.busy_ms;
        }
        total
    }

    async fn update(&self, worker: &WorkerId, apply: impl FnOnce(&mut WorkerActivity)) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(worker) {
            apply(state);
        }
    }
}

#[async_trait]
impl ExchangeObserver for WorkerMonitor {
    async fn request_sent(&self, worker: &WorkerId, throttled: Duration) {
        self.update(worker, |state| {
            state.metrics.requests += 1;
            state.metrics.throttled_ms += duration_ms(throttled);
        })
        .await;
    }

    async fn tool_called(&self, worker: &WorkerId, _tool: &str, succeeded: bool) {
        self.update(worker, |state| {
            state.metrics.tool_calls += 1;
            if !succeeded {
                state.metrics.tool_failures += 1;
            }
        })
        .await;
    }

    async fn delegated(&self, from: &WorkerId, to: &WorkerId) {
        self.update(from, |state| state.metrics.delegations_sent += 1)
            .await;
        self.update(to, |state| state.metrics.delegations_received += 1)
            .await;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
