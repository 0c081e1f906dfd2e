use crewforge_core::WorkerId;
use crewforge_security::ToolPermissions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static description of a worker, as read from a topology file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker id.
    pub id: WorkerId,
    /// Role the worker plays.
    pub role: String,
    /// What the worker is trying to achieve.
    pub goal: String,
    /// Background that shapes the worker's answers.
    #[serde(default)]
    pub backstory: String,
    /// Whether the worker may hand tasks to other workers.
    #[serde(default)]
    pub delegator: bool,
    /// Workers a delegator may target. Empty means every other worker.
    #[serde(default)]
    pub subordinates: Vec<WorkerId>,
    /// Tools the worker may call.
    #[serde(default)]
    pub allowed_tools: ToolPermissions,
    /// Upper bound on backend turns within one exchange.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Request budget shared by every task this worker handles.
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
    /// Timeout for one backend call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Feed delegated output back to this delegator for review instead of
    /// adopting it as the task result.
    #[serde(default)]
    pub review_delegations: bool,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl WorkerConfig {
    /// Configure a worker with default limits.
    pub fn new(id: impl Into<WorkerId>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: String::new(),
            delegator: false,
            subordinates: Vec::new(),
            allowed_tools: ToolPermissions::new(),
            max_iterations: default_max_iterations(),
            max_requests_per_minute: None,
            request_timeout_secs: default_request_timeout_secs(),
            review_delegations: false,
        }
    }

    /// Set the backstory.
    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    /// Mark the worker as a delegator restricted to the given subordinates
    /// (empty = any other worker).
    pub fn with_delegation<I, W>(mut self, subordinates: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<WorkerId>,
    {
        self.delegator = true;
        self.subordinates = subordinates.into_iter().map(Into::into).collect();
        self
    }

    /// Grant tools.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().collect();
        self
    }

    /// Set the turn budget per task.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Limit backend requests per minute. Zero means unlimited.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.max_requests_per_minute = Some(requests_per_minute);
        self
    }

    /// Set the backend call timeout, rounded down to whole seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Keep ownership of delegated tasks and answer after reviewing the subordinate's output.
    pub fn with_review(mut self) -> Self {
        self.review_delegations = true;
        self
    }

    /// Timeout for one backend call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
