use crate::callback::TaskCallback;
use crate::context::RunContext;
use crate::delegation::DelegationScope;
use crate::graph::TaskGraph;
use crate::monitor::{WorkerActivity, WorkerMonitor};
use crate::types::{NodeState, RunStatus, TaskNode, TaskResult};
use chrono::{DateTime, Utc};
use crewforge_agent::{Assignment, ExchangeOutcome, RetryPolicy, WorkerRegistry, WorkerRunner};
use crewforge_core::{ConfigError, CrewError, CrewResult, TaskId};
use crewforge_security::RateLimiter;
use crewforge_tools::ToolInvoker;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Scheduler settings for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Upper bound on concurrently executing tasks.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// How many hops a task may be handed along before delegation is
    /// rejected as a loop.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,
    /// Run-wide timeout. Tasks still running when it fires are cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retries per backend call for retryable failures.
    #[serde(default)]
    pub backend_retries: u32,
}

fn default_max_in_flight() -> usize {
    4
}

fn default_max_delegation_depth() -> u32 {
    1
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_delegation_depth: default_max_delegation_depth(),
            timeout_secs: None,
            backend_retries: 0,
        }
    }
}

impl RunOptions {
    /// Set the concurrency bound.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set how many hops delegation may take.
    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// Set the run-wide timeout, rounded down to whole seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Set retries per backend call.
    pub fn with_backend_retries(mut self, retries: u32) -> Self {
        self.backend_retries = retries;
        self
    }

    /// The run-wide timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Reject a zero concurrency bound or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal state and result of one task in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Terminal state of the node.
    pub state: NodeState,
    /// Result recorded for the task.
    pub result: TaskResult,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Overall outcome.
    pub status: RunStatus,
    /// Task whose output is the run's output.
    pub final_task: TaskId,
    /// One entry per task, in declaration order.
    pub tasks: Vec<TaskReport>,
    /// Per-worker activity and metrics.
    pub workers: Vec<WorkerActivity>,
    /// Whether the run-wide timeout fired.
    pub timed_out: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl RunReport {
    /// The recorded result of a task. Repeated calls return the same result.
    pub fn result(&self, task: &TaskId) -> Option<&TaskResult> {
        self.tasks
            .iter()
            .find(|t| &t.result.task_id == task)
            .map(|t| &t.result)
    }

    /// The terminal state of a task.
    pub fn state(&self, task: &TaskId) -> Option<NodeState> {
        self.tasks
            .iter()
            .find(|t| &t.result.task_id == task)
            .map(|t| t.state)
    }

    /// Result of the designated final task.
    pub fn final_result(&self) -> Option<&TaskResult> {
        self.result(&self.final_task)
    }

    /// Output of the final task, if it succeeded.
    pub fn output(&self) -> Option<&str> {
        self.final_result().and_then(TaskResult::output)
    }

    /// Pretty-printed JSON form of the report.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Bookkeeping owned by the scheduling loop.
#[derive(Default)]
struct RunState {
    completed: HashSet<TaskId>,
    /// Tasks in flight or terminal.
    started: HashSet<TaskId>,
    /// A non-concurrent task currently running alone.
    exclusive: Option<TaskId>,
}

/// Run-scoped handles shared with every task execution.
#[derive(Clone)]
struct RunScope {
    workers: Arc<WorkerRegistry>,
    runner: Arc<WorkerRunner>,
    context: Arc<RunContext>,
    monitor: Arc<WorkerMonitor>,
    cancel: CancellationToken,
    max_delegation_depth: u32,
}

struct NodeExecution {
    task_id: TaskId,
    started_at: DateTime<Utc>,
    outcome: CrewResult<ExchangeOutcome>,
}

/// Walks the task graph and drives every task to a terminal state.
///
/// Ready tasks launch in declaration order as soon as their dependencies
/// complete, up to `max_in_flight` at a time. A failed task blocks everything
/// downstream of it while independent branches keep running.
pub struct Scheduler {
    graph: Arc<TaskGraph>,
    workers: Arc<WorkerRegistry>,
    tools: Arc<dyn ToolInvoker>,
    limiter: Arc<RateLimiter>,
    options: RunOptions,
}

impl Scheduler {
    /// Create a scheduler with default options. Rate limits come from the worker configs.
    pub fn new(graph: TaskGraph, workers: WorkerRegistry, tools: Arc<dyn ToolInvoker>) -> Self {
        let limiter = Arc::new(RateLimiter::from_limits(workers.rate_limits()));
        Self {
            graph: Arc::new(graph),
            workers: Arc::new(workers),
            tools,
            limiter,
            options: RunOptions::default(),
        }
    }

    /// Replace the run options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The validated task graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// The workers available to tasks.
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// The options every run uses.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute the graph to completion.
    pub async fn run(&self) -> RunReport {
        self.run_with_cancellation(CancellationToken::new()).await
    }

    /// Execute the graph until it completes or `cancel` fires.
    ///
    /// On cancellation in-flight tasks are dropped and, together with every
    /// task that has not started, recorded as cancelled. Completed results
    /// stay in the report.
    pub async fn run_with_cancellation(&self, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cancel = cancel.child_token();
        let deadline = self
            .options
            .timeout()
            .map(|timeout| tokio::time::Instant::now() + timeout);

        let monitor = Arc::new(WorkerMonitor::new(self.workers.iter().map(|w| w.id())));
        let runner = WorkerRunner::new(Arc::clone(&self.tools), Arc::clone(&self.limiter))
            .with_retry(RetryPolicy::default().with_max_retries(self.options.backend_retries))
            .with_observer(monitor.clone());
        let scope = RunScope {
            workers: Arc::clone(&self.workers),
            runner: Arc::new(runner),
            context: Arc::new(RunContext::new(self.graph.nodes().iter().map(|n| &n.id))),
            monitor,
            cancel: cancel.clone(),
            max_delegation_depth: self.options.max_delegation_depth,
        };

        info!(
            run_id = %run_id,
            tasks = self.graph.len(),
            workers = self.workers.len(),
            max_in_flight = self.options.max_in_flight,
            "Starting run"
        );

        let mut state = RunState::default();
        let mut executions: JoinSet<NodeExecution> = JoinSet::new();
        let mut callbacks: JoinSet<()> = JoinSet::new();
        let mut timed_out = false;

        loop {
            if !cancel.is_cancelled() {
                self.launch_ready(&mut state, &mut executions, &scope);
            }
            if executions.is_empty() {
                break;
            }

            let joined = match deadline {
                Some(deadline) if !cancel.is_cancelled() => tokio::select! {
                    joined = executions.join_next() => joined,
                    () = tokio::time::sleep_until(deadline) => {
                        warn!(run_id = %run_id, "Run timed out, cancelling in-flight tasks");
                        timed_out = true;
                        cancel.cancel();
                        continue;
                    }
                },
                _ => executions.join_next().await,
            };

            match joined {
                Some(Ok(execution)) => {
                    self.settle(execution, &mut state, &scope, &mut callbacks);
                }
                Some(Err(e)) => {
                    error!(run_id = %run_id, error = %e, "Task execution aborted");
                }
                None => break,
            }
        }

        for node in self.graph.nodes() {
            if scope.context.has_result(&node.id) {
                continue;
            }
            let (error, node_state) = if cancel.is_cancelled() {
                (CrewError::Cancelled, NodeState::Cancelled)
            } else {
                (
                    CrewError::Internal("task never became ready".to_string()),
                    NodeState::Failed,
                )
            };
            store(
                &scope.context,
                TaskResult::not_started(node.id.clone(), error),
                node_state,
            );
        }

        if cancel.is_cancelled() {
            callbacks.abort_all();
        }
        // Callbacks get whatever is left of the run deadline, no more.
        let drain = async {
            while let Some(joined) = callbacks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(run_id = %run_id, "Task callback panicked");
                    }
                }
            }
        };
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let drained = tokio::select! {
            biased;
            () = drain => true,
            () = cancel.cancelled() => false,
            () = expired => false,
        };
        if !drained {
            warn!(
                run_id = %run_id,
                pending = callbacks.len(),
                "Abandoning task callbacks still running at the run deadline"
            );
            callbacks.abort_all();
        }

        let tasks: Vec<TaskReport> = self
            .graph
            .nodes()
            .iter()
            .filter_map(|node| {
                Some(TaskReport {
                    state: scope.context.state(&node.id)?,
                    result: scope.context.result(&node.id)?,
                })
            })
            .collect();
        let status = if tasks.iter().any(|t| t.state == NodeState::Cancelled) {
            RunStatus::Cancelled
        } else if tasks.iter().all(|t| t.state == NodeState::Completed) {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };

        let finished_at = Utc::now();
        let report = RunReport {
            run_id,
            status,
            final_task: self.graph.final_task().id.clone(),
            tasks,
            workers: scope.monitor.snapshot().await,
            timed_out,
            started_at,
            finished_at,
            duration_ms: u64::try_from((finished_at - started_at).num_milliseconds())
                .unwrap_or(0),
        };

        info!(
            run_id = %run_id,
            status = ?report.status,
            duration_ms = report.duration_ms,
            "Run finished"
        );
        report
    }

    fn launch_ready(
        &self,
        state: &mut RunState,
        executions: &mut JoinSet<NodeExecution>,
        scope: &RunScope,
    ) {
        if state.exclusive.is_some() {
            return;
        }
        let ready = self.graph.ready_set(&state.completed, &state.started);
        for node in &ready {
            scope.context.set_state(&node.id, NodeState::Ready);
        }

        let max_in_flight = self.options.max_in_flight.max(1);
        for node in ready {
            if node.concurrency_eligible {
                if executions.len() >= max_in_flight {
                    break;
                }
            } else {
                // Nodes declared after a waiting sequential node wait with it.
                if !executions.is_empty() {
                    break;
                }
                state.exclusive = Some(node.id.clone());
            }

            state.started.insert(node.id.clone());
            scope.context.set_state(&node.id, NodeState::Running);
            info!(
                task_id = %node.id,
                worker = %node.worker,
                exclusive = !node.concurrency_eligible,
                "Launching task"
            );
            executions.spawn(execute_node(scope.clone(), node.clone()));

            if state.exclusive.is_some() {
                break;
            }
        }
    }

    fn settle(
        &self,
        execution: NodeExecution,
        state: &mut RunState,
        scope: &RunScope,
        callbacks: &mut JoinSet<()>,
    ) {
        let NodeExecution {
            task_id,
            started_at,
            outcome,
        } = execution;
        if state.exclusive.as_ref() == Some(&task_id) {
            state.exclusive = None;
        }
        let Some(node) = self.graph.get(&task_id) else {
            error!(task_id = %task_id, "Finished task is not part of the graph");
            return;
        };

        match outcome {
            Ok(outcome) => {
                let result = TaskResult::completed(task_id.clone(), &node.worker, outcome, started_at);
                info!(
                    task_id = %task_id,
                    worker = %node.worker,
                    status = ?result.status,
                    produced_by = ?result.produced_by,
                    duration_ms = result.duration_ms,
                    "Task completed"
                );
                state.completed.insert(task_id);
                if let Some(callback) = node.callback.clone() {
                    spawn_callback(callbacks, callback, result.clone());
                }
                store(&scope.context, result, NodeState::Completed);
            }
            Err(CrewError::Cancelled) => {
                warn!(task_id = %task_id, worker = %node.worker, "Task cancelled");
                store(
                    &scope.context,
                    TaskResult::failed(task_id, &node.worker, CrewError::Cancelled, started_at),
                    NodeState::Cancelled,
                );
            }
            Err(error) => {
                error!(
                    task_id = %task_id,
                    worker = %node.worker,
                    kind = error.kind(),
                    error = %error,
                    "Task failed"
                );
                for dependent in self.graph.dependents_closure(&task_id) {
                    if state.started.insert(dependent.id.clone()) {
                        warn!(
                            task_id = %dependent.id,
                            upstream = %task_id,
                            "Task blocked by failed upstream"
                        );
                        store(
                            &scope.context,
                            TaskResult::not_started(
                                dependent.id.clone(),
                                CrewError::Blocked {
                                    upstream: task_id.clone(),
                                },
                            ),
                            NodeState::Blocked,
                        );
                    }
                }
                store(
                    &scope.context,
                    TaskResult::failed(task_id, &node.worker, error, started_at),
                    NodeState::Failed,
                );
            }
        }
    }
}

fn store(context: &RunContext, result: TaskResult, state: NodeState) {
    let task_id = result.task_id.clone();
    if let Err(e) = context.record(result) {
        error!(task_id = %task_id, error = %e, "Dropping duplicate task result");
        return;
    }
    context.set_state(&task_id, state);
}

fn spawn_callback(callbacks: &mut JoinSet<()>, callback: Arc<dyn TaskCallback>, result: TaskResult) {
    callbacks.spawn(async move {
        if let Err(e) = callback.on_complete(&result).await {
            warn!(task_id = %result.task_id, error = %e, "Task callback failed");
        }
    });
}

async fn execute_node(scope: RunScope, node: TaskNode) -> NodeExecution {
    let started_at = Utc::now();
    let clock = tokio::time::Instant::now();
    scope.monitor.start_task(&node.worker).await;

    let outcome = tokio::select! {
        biased;
        () = scope.cancel.cancelled() => Err(CrewError::Cancelled),
        caught = AssertUnwindSafe(run_exchange(&scope, &node)).catch_unwind() => {
            caught.unwrap_or_else(|panic| {
                Err(CrewError::Internal(format!(
                    "task panicked: {}",
                    panic_message(panic.as_ref())
                )))
            })
        }
    };

    scope
        .monitor
        .finish_task(&node.worker, outcome.is_ok(), clock.elapsed())
        .await;
    NodeExecution {
        task_id: node.id,
        started_at,
        outcome,
    }
}

async fn run_exchange(scope: &RunScope, node: &TaskNode) -> CrewResult<ExchangeOutcome> {
    let worker = scope.workers.get(&node.worker).ok_or_else(|| {
        CrewError::Internal(format!("worker '{}' is not registered", node.worker))
    })?;
    let assignment = Assignment {
        task_id: node.id.clone(),
        description: node.description.clone(),
        expected_output: node.expected_output.clone(),
        context: Arc::new(scope.context.outputs_for(&node.depends_on)),
        tools: node.tool_whitelist.clone(),
    };
    let delegation = DelegationScope::root(
        &scope.workers,
        &scope.runner,
        &scope.context,
        node.id.clone(),
        node.worker.clone(),
        scope.max_delegation_depth,
    );
    scope.runner.run(worker, &assignment, &delegation).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
