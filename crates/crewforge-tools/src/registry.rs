use crate::tool::{Tool, ToolDescriptor};
use async_trait::async_trait;
use crewforge_core::{LatencyClass, ToolCall, ToolError, ToolErrorKind};
use crewforge_security::ToolPermissions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The capability-execution boundary workers call through.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke a capability by name with a single string argument.
    async fn invoke(&self, capability: &str, argument: &str) -> Result<String, ToolError>;

    /// Invoke a tool call after checking it against a permission set.
    async fn invoke_permitted(
        &self,
        call: &ToolCall,
        permissions: &ToolPermissions,
    ) -> Result<String, ToolError> {
        if !permissions.allows(&call.name) {
            warn!(tool = %call.name, "Tool call denied: not in the task's permitted tools");
            return Err(ToolError::new(
                &call.name,
                ToolErrorKind::NotPermitted,
                "tool is not available for this task",
            ));
        }
        self.invoke(&call.name, &call.argument).await
    }
}

/// Timeout policy per latency class. `None` means "wait until cancelled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTimeouts {
    /// Timeout for automated tools. `None` waits indefinitely.
    #[serde(default = "default_automated_timeout", with = "opt_secs")]
    pub automated: Option<Duration>,
    /// Timeout for human input. `None` (the default) waits until the run ends.
    #[serde(default, with = "opt_secs")]
    pub human: Option<Duration>,
}

fn default_automated_timeout() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            automated: default_automated_timeout(),
            human: None,
        }
    }
}

impl ToolTimeouts {
    /// The timeout that applies to a latency class.
    pub fn for_class(&self, class: LatencyClass) -> Option<Duration> {
        match class {
            LatencyClass::Automated => self.automated,
            LatencyClass::Human => self.human,
        }
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Write an optional duration as whole seconds.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    /// Read an optional duration from whole seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Central registry for all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeouts: ToolTimeouts,
}

impl ToolRegistry {
    /// Create an empty registry with default timeouts.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeouts: ToolTimeouts::default(),
        }
    }

    /// Replace the per-class timeouts.
    pub fn with_timeouts(mut self, timeouts: ToolTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Register a tool under its descriptor name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, latency = ?tool.descriptor().latency, "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Descriptors sorted by name.
    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, capability: &str, argument: &str) -> Result<String, ToolError> {
        let tool = self.tools.get(capability).ok_or_else(|| {
            ToolError::new(capability, ToolErrorKind::NotFound, "no such tool is registered")
        })?;

        match self.timeouts.for_class(tool.descriptor().latency) {
            Some(limit) => tokio::time::timeout(limit, tool.call(argument))
                .await
                .unwrap_or_else(|_| {
                    warn!(tool = %capability, timeout_secs = limit.as_secs(), "Tool call timed out");
                    Err(ToolError::new(
                        capability,
                        ToolErrorKind::Timeout,
                        format!("no answer within {}s", limit.as_secs()),
                    ))
                }),
            None => tool.call(argument).await,
        }
    }
}
