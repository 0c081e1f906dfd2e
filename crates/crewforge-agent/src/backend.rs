use async_trait::async_trait;
use crewforge_core::{BackendError, TaskId, ToolCall, ToolError, WorkerId};
use crewforge_security::ToolPermissions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output of an upstream task, as presented to a downstream worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Upstream task that produced the text.
    pub source_task: TaskId,
    /// The upstream output.
    pub text: String,
}

/// Something that happened inside the current exchange and is fed back to the
/// backend on its next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    /// A tool answered.
    ToolOutput {
        /// Tool that was called.
        tool: String,
        /// Argument it was called with.
        argument: String,
        /// What it returned.
        output: String,
    },
    /// A tool failed. The backend is expected to adapt.
    ToolFailure {
        /// Tool that was called.
        tool: String,
        /// Argument it was called with.
        argument: String,
        /// Why it failed.
        error: ToolError,
    },
    /// A subordinate finished delegated work (review mode only).
    DelegatedOutput {
        /// Subordinate that did the work.
        worker: WorkerId,
        /// Its final answer.
        output: String,
    },
    /// A delegation could not be carried out.
    DelegationFailure {
        /// Intended target.
        worker: WorkerId,
        /// Why the delegation failed.
        error: String,
    },
    /// The engine refused part of the previous response.
    Notice {
        /// What was refused and why.
        message: String,
    },
}

/// Everything a backend needs to take one turn for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Task being worked on.
    pub task_id: TaskId,
    /// Worker taking the turn.
    pub worker_id: WorkerId,
    /// Worker role.
    pub role: String,
    /// Worker goal.
    pub goal: String,
    /// Worker backstory.
    pub backstory: String,
    /// Task description, possibly rewritten by a delegator.
    pub task_description: String,
    /// Description of the expected result.
    pub expected_output: String,
    /// Upstream outputs in `depends_on` declaration order.
    pub context: Vec<ContextEntry>,
    /// Tools the worker may call for this task.
    pub available_tools: Vec<String>,
    /// Workers this worker may delegate to. Empty for non-delegators.
    pub delegates: Vec<WorkerId>,
    /// What happened on earlier turns of this exchange.
    pub transcript: Vec<Observation>,
    /// 1-based turn number within this exchange.
    pub iteration: u32,
}

/// A delegator's request to hand the task to another worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    /// Worker to hand the task to.
    pub target: WorkerId,
    /// The (possibly rewritten) task description for the target.
    pub description: String,
}

impl DelegationRequest {
    /// Ask for a task to be handed to `target`.
    pub fn new(target: impl Into<WorkerId>, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
        }
    }
}

/// One backend turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionResponse {
    /// The worker's answer to the task.
    FinalAnswer {
        /// The answer text.
        text: String,
    },
    /// Hand the task to another worker.
    Delegate(DelegationRequest),
    /// Invoke a tool and come back with the result.
    ToolCall(ToolCall),
}

impl CompletionResponse {
    /// A final answer.
    pub fn final_answer(text: impl Into<String>) -> Self {
        CompletionResponse::FinalAnswer { text: text.into() }
    }

    /// A delegation request.
    pub fn delegate(target: impl Into<WorkerId>, description: impl Into<String>) -> Self {
        CompletionResponse::Delegate(DelegationRequest::new(target, description))
    }

    /// A tool call.
    pub fn tool_call(name: impl Into<String>, argument: impl Into<String>) -> Self {
        CompletionResponse::ToolCall(ToolCall::new(name, argument))
    }
}

/// Trait for text-completion providers.
///
/// Implementations wrap a model API (or a scripted stand-in). Timeouts and
/// retries are applied by the [`WorkerRunner`](crate::WorkerRunner), not here.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Take one turn.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, BackendError>;
}

/// The task as handed to a worker (or, after delegation, to a subordinate).
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Task being assigned.
    pub task_id: TaskId,
    /// Task description.
    pub description: String,
    /// Description of the expected result.
    pub expected_output: String,
    /// Upstream outputs in dependency order.
    pub context: Arc<Vec<ContextEntry>>,
    /// Task whitelist; empty means the worker's full tool set.
    pub tools: ToolPermissions,
}

impl Assignment {
    /// The same task with a rewritten description, sharing the upstream context.
    pub fn restated(&self, description: impl Into<String>) -> Self {
        Self {
            task_id: self.task_id.clone(),
            description: description.into(),
            expected_output: self.expected_output.clone(),
            context: Arc::clone(&self.context),
            tools: self.tools.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization_is_tagged() {
        let json = serde_json::to_string(&CompletionResponse::final_answer("done")).unwrap();
        assert_eq!(json, r#"{"type":"final_answer","text":"done"}"#);

        let delegate = CompletionResponse::delegate("writer", "Write the intro");
        let json = serde_json::to_string(&delegate).unwrap();
        assert!(json.contains(r#""type":"delegate""#));
        assert!(json.contains(r#""target":"writer""#));
        let parsed: CompletionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, delegate);
    }

    #[test]
    fn test_restated_assignment_shares_context() {
        let assignment = Assignment {
            task_id: TaskId::new("report"),
            description: "Write the report".to_string(),
            expected_output: "A report".to_string(),
            context: Arc::new(vec![ContextEntry {
                source_task: TaskId::new("research"),
                text: "facts".to_string(),
            }]),
            tools: ToolPermissions::new(),
        };
        let restated = assignment.restated("Write only the summary");
        assert_eq!(restated.description, "Write only the summary");
        assert_eq!(restated.task_id, assignment.task_id);
        assert!(Arc::ptr_eq(&restated.context, &assignment.context));
    }
}
