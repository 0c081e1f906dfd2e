use crate::ids::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A convenience `Result` alias using [`CrewError`].
pub type CrewResult<T> = Result<T, CrewError>;

/// Top-level error type for crewforge.
///
/// Errors are `Clone` and serializable because a failed node keeps its error
/// inside its task result for the whole run report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewError {
    /// The topology is invalid. Raised before anything is scheduled.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A worker ran out of backend turns without producing a final answer.
    #[error("Worker '{worker}' exceeded its iteration budget of {max_iterations}")]
    IterationBudgetExceeded {
        /// Worker whose exchange ran out of turns.
        worker: WorkerId,
        /// The configured budget.
        max_iterations: u32,
    },

    /// A delegation would target the delegator itself, re-enter the chain, or
    /// exceed the maximum delegation depth.
    #[error("Delegation loop: {} -> {target}", ChainDisplay(.chain))]
    DelegationLoop {
        /// Workers already handling the task, outermost first.
        chain: Vec<WorkerId>,
        /// The rejected delegation target.
        target: WorkerId,
    },

    /// A delegation request names a worker the delegator may not use.
    /// Reported back to the delegator, which can pick another target.
    #[error("Invalid delegation to '{target}': {reason}")]
    InvalidDelegation {
        /// The requested target.
        target: WorkerId,
        /// Why the target was refused.
        reason: String,
    },

    /// The completion backend failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A tool failure surfaced to a caller of a `ToolInvoker`.
    ///
    /// Inside a worker exchange tool failures are handed back to the backend
    /// as observations, so the scheduler never records this on a task.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The run was cancelled or timed out before the task finished.
    #[error("Cancelled")]
    Cancelled,

    /// An upstream dependency failed, so the task never ran.
    #[error("Blocked by failed upstream task '{upstream}'")]
    Blocked {
        /// The failed task this one (transitively) depends on.
        upstream: TaskId,
    },

    /// A completion callback failed.
    #[error("Callback error: {0}")]
    Callback(String),

    /// An unexpected failure inside the engine (e.g. a panicking task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrewError {
    /// Short machine-readable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CrewError::Configuration(_) => "configuration",
            CrewError::IterationBudgetExceeded { .. } => "iteration_budget_exceeded",
            CrewError::DelegationLoop { .. } => "delegation_loop",
            CrewError::InvalidDelegation { .. } => "invalid_delegation",
            CrewError::Backend(_) => "backend",
            CrewError::Tool(_) => "tool",
            CrewError::Cancelled => "cancelled",
            CrewError::Blocked { .. } => "blocked",
            CrewError::Callback(_) => "callback",
            CrewError::Internal(_) => "internal",
        }
    }

    /// Whether this error must end the surrounding exchange instead of being
    /// reported back to a delegator as an observation.
    pub fn is_fatal_for_delegator(&self) -> bool {
        matches!(
            self,
            CrewError::DelegationLoop { .. } | CrewError::Cancelled | CrewError::Internal(_)
        )
    }
}

struct ChainDisplay<'a>(&'a [WorkerId]);

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, worker) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{worker}")?;
        }
        Ok(())
    }
}

/// Validation failures detected while building a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigError {
    /// The dependency relation contains a cycle.
    #[error("dependency cycle: {}", .path.iter().map(TaskId::as_str).collect::<Vec<_>>().join(" -> "))]
    Cycle {
        /// Tasks along the cycle; the first task is repeated at the end.
        path: Vec<TaskId>,
    },

    /// A task depends on a task id that does not exist.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The dependent task.
        task: TaskId,
        /// The missing dependency.
        dependency: TaskId,
    },

    /// Two tasks or two workers share an id.
    #[error("duplicate id '{id}'")]
    DuplicateId {
        /// The colliding id.
        id: String,
    },

    /// A task lists itself as a dependency.
    #[error("task '{task}' depends on itself")]
    SelfDependency {
        /// The offending task.
        task: TaskId,
    },

    /// A task is assigned to a worker that does not exist.
    #[error("task '{task}' is assigned to unknown worker '{worker}'")]
    UnknownWorker {
        /// The task.
        task: TaskId,
        /// The missing worker.
        worker: WorkerId,
    },

    /// A task whitelists a tool its worker is not allowed to use.
    #[error("task '{task}' whitelists tool '{tool}' which worker '{worker}' is not allowed to use")]
    ToolNotAllowed {
        /// The task.
        task: TaskId,
        /// The assigned worker.
        worker: WorkerId,
        /// The tool outside the worker's allowed set.
        tool: String,
    },

    /// A delegator names a subordinate that does not exist or is itself.
    #[error("worker '{worker}' lists invalid subordinate '{subordinate}'")]
    InvalidSubordinate {
        /// The delegator.
        worker: WorkerId,
        /// The rejected subordinate.
        subordinate: WorkerId,
    },

    /// The designated final task does not exist.
    #[error("final task '{task}' does not exist")]
    UnknownFinalTask {
        /// The designated id.
        task: TaskId,
    },

    /// The graph has no tasks.
    #[error("task graph is empty")]
    EmptyGraph,

    /// A field holds a value outside its allowed range.
    #[error("invalid value: {0}")]
    Invalid(String),

    /// The topology document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Classification of completion backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// The call did not answer within its timeout.
    Timeout,
    /// The provider refused the call because of quota or rate limits.
    RateLimited,
    /// The call failed in transit (connection reset, 5xx, ...).
    Transport,
    /// The provider answered with something the engine cannot interpret.
    Protocol,
    /// Anything else.
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::RateLimited => write!(f, "rate_limited"),
            BackendErrorKind::Transport => write!(f, "transport"),
            BackendErrorKind::Protocol => write!(f, "protocol"),
            BackendErrorKind::Other => write!(f, "other"),
        }
    }
}

/// A failure reported by a completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// What went wrong.
    pub kind: BackendErrorKind,
    /// Provider-specific detail.
    pub message: String,
}

impl BackendError {
    /// Creates a backend error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::Timeout | BackendErrorKind::RateLimited | BackendErrorKind::Transport
        )
    }
}

/// Classification of tool failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The tool did not answer within its timeout.
    Timeout,
    /// No tool with this name is registered.
    NotFound,
    /// The tool exists but the current task may not use it.
    NotPermitted,
    /// The tool ran and failed.
    Failed,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolErrorKind::Timeout => write!(f, "timeout"),
            ToolErrorKind::NotFound => write!(f, "not_found"),
            ToolErrorKind::NotPermitted => write!(f, "not_permitted"),
            ToolErrorKind::Failed => write!(f, "failed"),
        }
    }
}

/// A failure reported by a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("tool '{tool}' {kind}: {message}")]
pub struct ToolError {
    /// Capability name.
    pub tool: String,
    /// What went wrong.
    pub kind: ToolErrorKind,
    /// Tool-specific detail.
    pub message: String,
}

impl ToolError {
    /// Creates a tool error.
    pub fn new(tool: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind,
            message: message.into(),
        }
    }

    /// Creates a [`ToolErrorKind::Failed`] error.
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(tool, ToolErrorKind::Failed, message)
    }
}
