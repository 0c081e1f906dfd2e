use async_trait::async_trait;
use crewforge_agent::{CompletionBackend, CompletionRequest, CompletionResponse, WorkerConfig};
use crewforge_core::BackendError;
use crewforge_orchestrator::profiles::{READ_PAGE_TOOL, SEARCH_TOOL, TRANSLATE_TOOL};
use crewforge_tools::{FnTool, ToolDescriptor, ToolRegistry, ToolTimeouts, HUMAN_TOOL};
use std::sync::Arc;

/// Deterministic stand-in for a model backend.
///
/// Delegators hand the task to their first candidate on the opening turn.
/// Other workers call their first automated tool once, then answer with a
/// summary of what they were given.
pub struct DryRunBackend;

#[async_trait]
impl CompletionBackend for DryRunBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        if request.iteration == 1 {
            if let Some(target) = request.delegates.first() {
                return Ok(CompletionResponse::delegate(
                    target.clone(),
                    request.task_description.clone(),
                ));
            }
        }
        if request.transcript.is_empty() {
            if let Some(tool) = request
                .available_tools
                .iter()
                .find(|tool| tool.as_str() != HUMAN_TOOL)
            {
                return Ok(CompletionResponse::tool_call(
                    tool.clone(),
                    request.task_description.clone(),
                ));
            }
        }
        Ok(CompletionResponse::final_answer(summarize(request)))
    }
}

fn summarize(request: &CompletionRequest) -> String {
    let mut text = format!(
        "[{} / {}] {}",
        request.worker_id, request.role, request.task_description
    );
    if !request.context.is_empty() {
        let sources: Vec<&str> = request
            .context
            .iter()
            .map(|entry| entry.source_task.as_str())
            .collect();
        text.push_str(&format!(" (building on {})", sources.join(", ")));
    }
    if !request.transcript.is_empty() {
        text.push_str(&format!(" after {} observation(s)", request.transcript.len()));
    }
    text
}

/// Backend factory for [`Topology::into_graph`](crewforge_orchestrator::Topology::into_graph).
pub fn dry_run_backend(_config: &WorkerConfig) -> Arc<dyn CompletionBackend> {
    Arc::new(DryRunBackend)
}

/// Offline versions of the tools the article crew uses.
pub fn stand_in_tools(timeouts: ToolTimeouts) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_timeouts(timeouts);
    registry.register(Arc::new(FnTool::new(
        ToolDescriptor::new(SEARCH_TOOL, "Search the web (offline stand-in)"),
        |query| Ok(format!("3 results for '{query}'")),
    )));
    registry.register(Arc::new(FnTool::new(
        ToolDescriptor::new(READ_PAGE_TOOL, "Read a web page (offline stand-in)"),
        |url| Ok(format!("contents of {url}")),
    )));
    registry.register(Arc::new(FnTool::new(
        ToolDescriptor::new(TRANSLATE_TOOL, "Translate text (offline stand-in)"),
        |text| Ok(format!("translated: {text}")),
    )));
    registry
}
