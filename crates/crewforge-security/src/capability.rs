use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A set of tool capability names.
///
/// Used both for a worker's `allowed_tools` and for a task's whitelist. The set
/// is ordered so tool lists handed to backends are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolPermissions {
    tools: BTreeSet<String>,
}

impl ToolPermissions {
    /// Create an empty permission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow a tool.
    pub fn grant(&mut self, tool: impl Into<String>) {
        self.tools.insert(tool.into());
    }

    /// Withdraw a tool.
    pub fn revoke(&mut self, tool: &str) {
        self.tools.remove(tool);
    }

    /// Whether the tool is in the set.
    pub fn allows(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    /// Whether the set names no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Number of tools in the set.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Tool names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(String::as_str)
    }

    /// Tools in `self` that `allowed` does not grant.
    pub fn not_covered_by<'a>(&'a self, allowed: &ToolPermissions) -> Vec<&'a str> {
        self.iter().filter(|t| !allowed.allows(t)).collect()
    }

    /// Narrow these permissions to a task whitelist.
    ///
    /// An empty whitelist means "no narrowing": the task inherits every tool of
    /// its worker.
    pub fn restrict_to(&self, whitelist: &ToolPermissions) -> ToolPermissions {
        if whitelist.is_empty() {
            return self.clone();
        }
        self.tools
            .intersection(&whitelist.tools)
            .cloned()
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ToolPermissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tools: iter.into_iter().map(Into::into).collect(),
        }
    }
}
