//! Task-graph orchestration for crewforge.
//!
//! Tasks and their dependencies form a [`TaskGraph`] that is validated once,
//! before anything runs. The [`Scheduler`] then launches every task as soon as
//! its dependencies have completed, runs independent branches concurrently,
//! feeds upstream outputs into downstream tasks, lets delegator workers hand
//! tasks to their subordinates, and keeps failures contained to the branch
//! they happened in.
//!
//! # Main types
//!
//! - [`TaskGraph`]: Validated task nodes with ready-set computation.
//! - [`Scheduler`]: Runs a graph to completion and returns a [`RunReport`].
//! - [`RunContext`]: Write-once task results and live node states.
//! - [`DelegationScope`]: Loop-free delegation for a single task.
//! - [`WorkerMonitor`]: Per-worker activity and metrics.
//! - [`Topology`]: TOML run configuration.

/// Completion callbacks.
pub mod callback;
/// Per-run results and node states.
pub mod context;
/// Delegation chain tracking.
pub mod delegation;
/// The scheduler and run reports.
pub mod engine;
/// Task graph validation and traversal.
pub mod graph;
/// Worker activity metrics.
pub mod monitor;
/// Built-in example crews.
pub mod profiles;
/// TOML run configuration.
pub mod topology;
/// Task nodes, results and states.
pub mod types;

pub use callback::{LogCallback, TaskCallback};
pub use context::RunContext;
pub use delegation::DelegationScope;
pub use engine::{RunOptions, RunReport, Scheduler, TaskReport};
pub use graph::TaskGraph;
pub use monitor::{WorkerActivity, WorkerMetrics, WorkerMonitor};
pub use profiles::article_crew;
pub use topology::{CallbackKind, TaskConfig, Topology};
pub use types::{NodeState, RunStatus, TaskNode, TaskResult, TaskStatus};
