use async_trait::async_trait;
use crewforge_core::{LatencyClass, ToolError};
use serde::{Deserialize, Serialize};

/// Metadata describing a tool's interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name workers use to call the tool.
    pub name: String,
    /// What the tool does, shown to the backend.
    pub description: String,
    /// Decides which timeout applies to calls.
    #[serde(default)]
    pub latency: LatencyClass,
}

impl ToolDescriptor {
    /// Describe an automated tool.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            latency: LatencyClass::Automated,
        }
    }

    /// Set the latency class.
    pub fn with_latency(mut self, latency: LatencyClass) -> Self {
        self.latency = latency;
        self
    }
}

/// Trait that every capability implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and latency class.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool with a free-form argument.
    async fn call(&self, argument: &str) -> Result<String, ToolError>;
}

type ToolFn = dyn Fn(&str) -> Result<String, ToolError> + Send + Sync;

/// A tool backed by a synchronous closure.
///
/// Handy for stand-in capabilities (dry runs, fixtures) that do no I/O.
pub struct FnTool {
    descriptor: ToolDescriptor,
    func: Box<ToolFn>,
}

impl FnTool {
    /// Wrap a synchronous closure as an automated tool.
    pub fn new<F>(descriptor: ToolDescriptor, func: F) -> Self
    where
        F: Fn(&str) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, argument: &str) -> Result<String, ToolError> {
        (self.func)(argument)
    }
}
