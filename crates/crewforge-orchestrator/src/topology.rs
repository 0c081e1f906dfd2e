use crate::callback::{LogCallback, TaskCallback};
use crate::engine::{RunOptions, Scheduler};
use crate::graph::TaskGraph;
use crate::types::TaskNode;
use crewforge_agent::{CompletionBackend, Worker, WorkerConfig, WorkerRegistry};
use crewforge_core::{ConfigError, TaskId, WorkerId};
use crewforge_security::ToolPermissions;
use crewforge_tools::{ToolInvoker, ToolTimeouts};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Built-in completion hooks a topology file can attach to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Log the task's output when it completes.
    Log,
}

impl CallbackKind {
    fn build(self) -> Arc<dyn TaskCallback> {
        match self {
            CallbackKind::Log => Arc::new(LogCallback),
        }
    }
}

/// A task as declared in a topology file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task id.
    pub id: TaskId,
    /// What the worker is asked to do.
    pub description: String,
    /// Description of the expected result.
    #[serde(default)]
    pub expected_output: String,
    /// Worker assigned to the task.
    pub worker: WorkerId,
    /// Tasks whose outputs this task consumes, in context order.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// `false` makes the task run alone.
    #[serde(default = "default_concurrent")]
    pub concurrent: bool,
    /// Tool whitelist for the task. Empty means the worker's full set.
    #[serde(default)]
    pub tools: ToolPermissions,
    /// Hook to run after the task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackKind>,
}

fn default_concurrent() -> bool {
    true
}

impl TaskConfig {
    /// Declare a task for a worker.
    pub fn new(
        id: impl Into<TaskId>,
        worker: impl Into<WorkerId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: String::new(),
            worker: worker.into(),
            depends_on: Vec::new(),
            concurrent: true,
            tools: ToolPermissions::new(),
            callback: None,
        }
    }

    /// Set the expected output.
    pub fn expecting(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    /// Add dependencies.
    pub fn depends_on<I, T>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Run the task alone, with nothing else in flight.
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Restrict the task to these tools.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().collect();
        self
    }

    /// Attach a completion hook.
    pub fn with_callback(mut self, callback: CallbackKind) -> Self {
        self.callback = Some(callback);
        self
    }

    fn into_node(self) -> TaskNode {
        let mut node = TaskNode::new(self.id, self.worker, self.description)
            .expecting(self.expected_output)
            .depends_on(self.depends_on);
        node.concurrency_eligible = self.concurrent;
        node.tool_whitelist = self.tools;
        node.callback = self.callback.map(CallbackKind::build);
        node
    }
}

/// A complete run configuration: workers, tasks and scheduler settings.
///
/// ```toml
/// final_task = "translate"
///
/// [run]
/// max_in_flight = 4
/// timeout_secs = 900
///
/// [[worker]]
/// id = "researcher"
/// role = "Senior Researcher"
/// goal = "Uncover groundbreaking technologies"
/// allowed_tools = ["search"]
///
/// [[task]]
/// id = "list_ideas"
/// worker = "researcher"
/// description = "List 10 ideas for an article"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Task whose output is the run's output. Defaults to the last sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_task: Option<TaskId>,
    /// Scheduler settings.
    #[serde(default)]
    pub run: RunOptions,
    /// Tool timeouts per latency class.
    #[serde(default)]
    pub tools: ToolTimeouts,
    /// Workers in declaration order.
    #[serde(default, rename = "worker")]
    pub workers: Vec<WorkerConfig>,
    /// Tasks in declaration order.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

impl Topology {
    /// Parse a topology from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse a topology file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("failed to read {}: {e}", path.display())))?;
        let topology = Self::from_toml_str(&text)?;
        info!(
            path = %path.display(),
            workers = topology.workers.len(),
            tasks = topology.tasks.len(),
            "Loaded topology"
        );
        Ok(topology)
    }

    /// Render the topology as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Bind every worker to a backend and build the validated graph.
    pub fn into_graph<F>(self, mut backend_for: F) -> Result<(TaskGraph, WorkerRegistry), ConfigError>
    where
        F: FnMut(&WorkerConfig) -> Arc<dyn CompletionBackend>,
    {
        self.run.validate()?;
        let workers = WorkerRegistry::new(
            self.workers
                .into_iter()
                .map(|config| {
                    let backend = backend_for(&config);
                    Worker::new(config, backend)
                })
                .collect(),
        )?;
        let nodes = self.tasks.into_iter().map(TaskConfig::into_node).collect();
        let mut graph = TaskGraph::build(nodes, &workers)?;
        if let Some(final_task) = &self.final_task {
            graph = graph.with_final_task(final_task)?;
        }
        Ok((graph, workers))
    }

    /// Build a scheduler configured with this topology's run options.
    pub fn into_scheduler<F>(
        self,
        backend_for: F,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<Scheduler, ConfigError>
    where
        F: FnMut(&WorkerConfig) -> Arc<dyn CompletionBackend>,
    {
        let options = self.run.clone();
        let (graph, workers) = self.into_graph(backend_for)?;
        Ok(Scheduler::new(graph, workers, tools).with_options(options))
    }
}
