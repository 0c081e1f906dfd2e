use serde::{Deserialize, Serialize};

/// A request from a completion backend to invoke a named capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the capability to invoke.
    pub name: String,
    /// The single string argument passed to the capability.
    pub argument: String,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument: argument.into(),
        }
    }
}

/// Expected latency of a capability, which selects its timeout policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    /// Machine-backed capabilities (search, page reads, translation).
    #[default]
    Automated,
    /// Capabilities waiting on a person; unbounded unless configured otherwise.
    Human,
}
