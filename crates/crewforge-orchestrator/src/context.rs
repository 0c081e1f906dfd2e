use crate::types::{NodeState, TaskResult};
use crewforge_agent::ContextEntry;
use crewforge_core::{CrewError, CrewResult, TaskId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-run record of task results and node states.
///
/// Results are write-once: the scheduler records exactly one result per task
/// and a second write for the same id is rejected. Reads are concurrent.
pub struct RunContext {
    results: RwLock<HashMap<TaskId, TaskResult>>,
    states: RwLock<HashMap<TaskId, NodeState>>,
}

impl RunContext {
    /// Create a context with every task `Pending`.
    pub fn new<'a>(tasks: impl IntoIterator<Item = &'a TaskId>) -> Self {
        let states = tasks
            .into_iter()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();
        Self {
            results: RwLock::new(HashMap::new()),
            states: RwLock::new(states),
        }
    }

    /// Store the terminal result of a task.
    pub fn record(&self, result: TaskResult) -> CrewResult<()> {
        let mut results = self.results.write();
        if results.contains_key(&result.task_id) {
            return Err(CrewError::Internal(format!(
                "result for task '{}' already recorded",
                result.task_id
            )));
        }
        results.insert(result.task_id.clone(), result);
        Ok(())
    }

    /// The recorded result of a task, if any.
    pub fn result(&self, task: &TaskId) -> Option<TaskResult> {
        self.results.read().get(task).cloned()
    }

    /// Whether a task has a recorded result.
    pub fn has_result(&self, task: &TaskId) -> bool {
        self.results.read().contains_key(task)
    }

    /// Outputs of the given upstream tasks, in the given order.
    ///
    /// Tasks without a successful result are skipped; the scheduler never
    /// starts a task before all of its dependencies have one.
    pub fn outputs_for(&self, dependencies: &[TaskId]) -> Vec<ContextEntry> {
        let results = self.results.read();
        dependencies
            .iter()
            .filter_map(|id| {
                let text = results.get(id)?.output.clone()?;
                Some(ContextEntry {
                    source_task: id.clone(),
                    text,
                })
            })
            .collect()
    }

    /// Record a node state transition.
    pub fn set_state(&self, task: &TaskId, state: NodeState) {
        self.states.write().insert(task.clone(), state);
    }

    /// Current state of a node.
    pub fn state(&self, task: &TaskId) -> Option<NodeState> {
        self.states.read().get(task).copied()
    }

    /// Move a running task to `DelegatedRunning`. No-op in any other state.
    pub fn mark_delegated(&self, task: &TaskId) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(task) {
            if *state == NodeState::Running {
                *state = NodeState::DelegatedRunning;
            }
        }
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Whether no result is recorded yet.
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}
