use crate::types::TaskResult;
use async_trait::async_trait;
use crewforge_core::CrewResult;
use tracing::info;

/// Hook invoked after a task completes successfully.
///
/// Callbacks run on their own tokio task. An error or a panic is logged and
/// never affects the task's result or the rest of the run.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    /// Called with the result of a successful task.
    async fn on_complete(&self, result: &TaskResult) -> CrewResult<()>;
}

#[async_trait]
impl<F> TaskCallback for F
where
    F: Fn(&TaskResult) -> CrewResult<()> + Send + Sync,
{
    async fn on_complete(&self, result: &TaskResult) -> CrewResult<()> {
        self(result)
    }
}

/// Logs the completed task and its output.
pub struct LogCallback;

#[async_trait]
impl TaskCallback for LogCallback {
    async fn on_complete(&self, result: &TaskResult) -> CrewResult<()> {
        info!(
            task_id = %result.task_id,
            produced_by = ?result.produced_by,
            output = result.output().unwrap_or_default(),
            "Task completed"
        );
        Ok(())
    }
}
