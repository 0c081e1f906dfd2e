use crate::callback::TaskCallback;
use crewforge_agent::ExchangeOutcome;
use crewforge_core::{CrewError, TaskId, WorkerId};
use crewforge_security::ToolPermissions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A unit of work in the task graph.
#[derive(Clone)]
pub struct TaskNode {
    /// Unique task id.
    pub id: TaskId,
    /// What the worker is asked to do.
    pub description: String,
    /// Description of the expected result.
    pub expected_output: String,
    /// Worker the scheduler hands this task to.
    pub worker: WorkerId,
    /// Upstream tasks, in the order their outputs are presented as context.
    pub depends_on: Vec<TaskId>,
    /// Whether the task may run alongside other tasks. A task that is not
    /// eligible only starts when nothing else is running, and runs alone.
    pub concurrency_eligible: bool,
    /// Tools the task may use; empty means every tool its worker may use.
    pub tool_whitelist: ToolPermissions,
    /// Hook to run after the task completes.
    pub callback: Option<Arc<dyn TaskCallback>>,
}

impl TaskNode {
    /// Create a concurrency-eligible task with no dependencies.
    pub fn new(
        id: impl Into<TaskId>,
        worker: impl Into<WorkerId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: String::new(),
            worker: worker.into(),
            depends_on: Vec::new(),
            concurrency_eligible: true,
            tool_whitelist: ToolPermissions::new(),
            callback: None,
        }
    }

    /// Set the expected output.
    pub fn expecting(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    /// Add dependencies.
    pub fn depends_on<I, T>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Run this task exclusively.
    pub fn sequential(mut self) -> Self {
        self.concurrency_eligible = false;
        self
    }

    /// Restrict the task to these tools.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_whitelist = tools.into_iter().collect();
        self
    }

    /// Attach a completion hook.
    pub fn with_callback(mut self, callback: Arc<dyn TaskCallback>) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("worker", &self.worker)
            .field("depends_on", &self.depends_on)
            .field("concurrency_eligible", &self.concurrency_eligible)
            .field("tool_whitelist", &self.tool_whitelist)
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Terminal status of a task result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The assigned worker produced the output.
    Success,
    /// The task ran and failed, was blocked, or was cancelled.
    Failed,
    /// Another worker produced the output through delegation.
    Delegated,
}

/// Execution state of a node during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies met, waiting for a slot.
    Ready,
    /// The assigned worker is on it.
    Running,
    /// Running, with the work handed to another worker.
    DelegatedRunning,
    /// Finished with an output.
    Completed,
    /// Finished with an error.
    Failed,
    /// An upstream task failed; never started.
    Blocked,
    /// The run was cancelled or timed out first.
    Cancelled,
}

impl NodeState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Completed | NodeState::Failed | NodeState::Blocked | NodeState::Cancelled
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::DelegatedRunning => "delegated_running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Blocked => "blocked",
            NodeState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The single terminal result of a task.
///
/// `output` is present iff the status is not [`TaskStatus::Failed`]; `error`
/// is present iff it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to.
    pub task_id: TaskId,
    /// How the task ended.
    pub status: TaskStatus,
    /// Final answer, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Why the task did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CrewError>,
    /// Worker whose answer became the output, or the assigned worker for a
    /// failed execution. `None` when the task never started.
    pub produced_by: Option<WorkerId>,
    /// Workers that handled the task, outermost first.
    #[serde(default)]
    pub delegation_chain: Vec<WorkerId>,
    /// When execution started. `None` if it never started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the result was recorded.
    pub finished_at: DateTime<Utc>,
    /// Execution time, zero if the task never started.
    pub duration_ms: u64,
}

impl TaskResult {
    /// Result of a successful exchange.
    pub fn completed(
        task_id: TaskId,
        assigned: &WorkerId,
        outcome: ExchangeOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = if &outcome.produced_by == assigned {
            TaskStatus::Success
        } else {
            TaskStatus::Delegated
        };
        let finished_at = Utc::now();
        Self {
            task_id,
            status,
            output: Some(outcome.output),
            error: None,
            produced_by: Some(outcome.produced_by),
            delegation_chain: outcome.handled_by,
            started_at: Some(started_at),
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    /// Result of an execution that started and failed (or was cancelled).
    pub fn failed(
        task_id: TaskId,
        assigned: &WorkerId,
        error: CrewError,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
            produced_by: Some(assigned.clone()),
            delegation_chain: vec![assigned.clone()],
            started_at: Some(started_at),
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    /// Result of a task that never started.
    pub fn not_started(task_id: TaskId, error: CrewError) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
            produced_by: None,
            delegation_chain: Vec::new(),
            started_at: None,
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Whether the task produced an output.
    pub fn is_success(&self) -> bool {
        self.status != TaskStatus::Failed
    }

    /// The output, if the task succeeded.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }
}

fn elapsed_ms(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> u64 {
    u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0)
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed.
    Success,
    /// At least one task failed or was blocked.
    PartialFailure,
    /// The run was cancelled or timed out before every task finished.
    Cancelled,
}
