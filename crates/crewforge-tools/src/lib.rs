//! Tool capabilities and the invocation boundary for crewforge workers.
//!
//! Concrete capabilities (web search, page reads, translation) live outside
//! this workspace; they plug in by implementing [`Tool`]. The registry applies
//! timeouts per [`LatencyClass`](crewforge_core::LatencyClass) so a human
//! prompt is never cut off by the budget meant for automated tools.
//!
//! # Main types
//!
//! - [`Tool`]: Trait every capability implements.
//! - [`ToolInvoker`]: The boundary workers call through.
//! - [`ToolRegistry`]: Name-indexed tool set implementing [`ToolInvoker`].
//! - [`HumanInputTool`]: The `human` capability backed by a [`HumanChannel`](crewforge_core::HumanChannel).

/// The `human` capability and a terminal channel for it.
pub mod human;
/// Tool registry and invocation timeouts.
pub mod registry;
/// Tool trait and descriptors.
pub mod tool;

pub use human::{HumanInputTool, StdinHumanChannel, HUMAN_TOOL};
pub use registry::{ToolInvoker, ToolRegistry, ToolTimeouts};
pub use tool::{FnTool, Tool, ToolDescriptor};
