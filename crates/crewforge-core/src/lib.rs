//! Core types and error definitions for the crewforge workspace.
//!
//! This crate provides the foundational types shared across all crewforge crates:
//! identifiers for tasks and workers, the error taxonomy, tool call shapes and
//! the human-input channel abstraction.
//!
//! # Main types
//!
//! - [`CrewError`]: Unified error enum for every crewforge subsystem.
//! - [`CrewResult`]: Convenience alias for `Result<T, CrewError>`.
//! - [`ConfigError`]: Validation failures raised before any task executes.
//! - [`TaskId`] / [`WorkerId`]: String-backed identifiers from the run topology.
//! - [`ToolCall`]: A backend-initiated request to invoke a named capability.

/// Error taxonomy.
pub mod error;
/// Human-in-the-loop input types.
pub mod human;
/// Task and worker identifiers.
pub mod ids;
/// Tool call types.
pub mod tool;

pub use error::{
    BackendError, BackendErrorKind, ConfigError, CrewError, CrewResult, ToolError, ToolErrorKind,
};
pub use human::{HumanChannel, HumanQuery, HumanReply};
pub use ids::{TaskId, WorkerId};
pub use tool::{LatencyClass, ToolCall};
