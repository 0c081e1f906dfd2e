use crate::tool::{Tool, ToolDescriptor};
use async_trait::async_trait;
use crewforge_core::{
    CrewError, CrewResult, HumanChannel, HumanQuery, HumanReply, LatencyClass, ToolError,
};
use std::sync::Arc;
use tracing::info;

/// Capability name of the human-input tool.
pub const HUMAN_TOOL: &str = "human";

/// The `human` capability: forwards the argument as a question to a person.
///
/// Registered with [`LatencyClass::Human`], so the registry applies the human
/// timeout policy (unbounded by default) instead of the automated one.
pub struct HumanInputTool {
    descriptor: ToolDescriptor,
    channel: Arc<dyn HumanChannel>,
}

impl HumanInputTool {
    /// Wrap a channel that reaches a person.
    pub fn new(channel: Arc<dyn HumanChannel>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                HUMAN_TOOL,
                "Ask a human for guidance or a missing fact. The argument is the question.",
            )
            .with_latency(LatencyClass::Human),
            channel,
        }
    }
}

#[async_trait]
impl Tool for HumanInputTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, argument: &str) -> Result<String, ToolError> {
        info!(question = %argument, "Waiting for human input");
        let reply = self
            .channel
            .ask(HumanQuery {
                prompt: argument.to_string(),
            })
            .await
            .map_err(|e| ToolError::failed(HUMAN_TOOL, e.to_string()))?;
        info!(responder = %reply.responder, "Human input received");
        Ok(reply.answer)
    }
}

/// Terminal channel that prints the question on stderr and reads one line
/// from stdin.
///
/// Stdout is left untouched so a run report can be piped elsewhere.
pub struct StdinHumanChannel;

/// Format the question for display on stderr.
pub fn format_human_prompt(query: &HumanQuery) -> String {
    let mut prompt = String::new();
    prompt.push_str("\n\x1b[1;37m== INPUT REQUESTED ==\x1b[0m\n");
    for line in query.prompt.lines() {
        prompt.push_str("  ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("  > ");
    prompt
}

#[async_trait]
impl HumanChannel for StdinHumanChannel {
    async fn ask(&self, query: HumanQuery) -> CrewResult<HumanReply> {
        eprint!("{}", format_human_prompt(&query));

        let input = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map(|_| input)
        })
        .await
        .map_err(|e| CrewError::Internal(format!("stdin reader failed: {e}")))?
        .map_err(|e| CrewError::Internal(format!("stdin read error: {e}")))?;

        let responder = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "cli-user".to_string());

        Ok(HumanReply {
            answer: input.trim_end().to_string(),
            responder,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct CannedChannel(&'static str);

    #[async_trait]
    impl HumanChannel for CannedChannel {
        async fn ask(&self, query: HumanQuery) -> CrewResult<HumanReply> {
            Ok(HumanReply {
                answer: format!("{} ({})", self.0, query.prompt),
                responder: "tester".to_string(),
            })
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl HumanChannel for BrokenChannel {
        async fn ask(&self, _query: HumanQuery) -> CrewResult<HumanReply> {
            Err(CrewError::Internal("terminal closed".into()))
        }
    }

    #[tokio::test]
    async fn test_human_tool_returns_answer() {
        let tool = HumanInputTool::new(Arc::new(CannedChannel("yes")));
        assert_eq!(tool.descriptor().name, HUMAN_TOOL);
        assert_eq!(tool.descriptor().latency, LatencyClass::Human);
        assert_eq!(tool.call("ship it?").await.unwrap(), "yes (ship it?)");
    }

    #[tokio::test]
    async fn test_channel_failure_becomes_tool_error() {
        let tool = HumanInputTool::new(Arc::new(BrokenChannel));
        let err = tool.call("anyone?").await.unwrap_err();
        assert_eq!(err.tool, HUMAN_TOOL);
        assert!(err.message.contains("terminal closed"));
    }

    #[test]
    fn test_prompt_indents_every_line() {
        let prompt = format_human_prompt(&HumanQuery {
            prompt: "Which topic?\nPick one".to_string(),
        });
        assert!(prompt.contains("  Which topic?\n"));
        assert!(prompt.contains("  Pick one\n"));
        assert!(prompt.ends_with("> "));
    }
}
