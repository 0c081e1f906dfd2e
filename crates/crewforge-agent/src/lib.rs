//! Workers and the completion exchange for crewforge.
//!
//! A worker is a role bound to a [`CompletionBackend`]. The [`WorkerRunner`]
//! drives one exchange per task: backend turn, optional tool call, backend
//! turn again, until the backend produces a final answer, hands the task to
//! another worker, or runs out of iterations.
//!
//! # Main types
//!
//! - [`CompletionBackend`]: The black-box text-completion boundary.
//! - [`Worker`] / [`WorkerRegistry`]: Configured roles, immutable for a run.
//! - [`WorkerRunner`]: The bounded backend → tool → backend loop.
//! - [`DelegateHandler`]: Hook the orchestrator uses to resolve delegation requests.
//! - [`RetryPolicy`]: Backend retry and backoff settings.

/// Completion backend interface and exchange types.
pub mod backend;
/// Worker configuration.
pub mod config;
/// Backend retry policy.
pub mod retry;
/// The worker exchange loop.
pub mod runner;
/// Workers and the worker registry.
pub mod worker;

pub use backend::{
    Assignment, CompletionBackend, CompletionRequest, CompletionResponse, ContextEntry,
    DelegationRequest, Observation,
};
pub use config::WorkerConfig;
pub use retry::RetryPolicy;
pub use runner::{
    DelegateHandler, ExchangeObserver, ExchangeOutcome, NoDelegation, NoopObserver, WorkerRunner,
};
pub use worker::{Worker, WorkerRegistry};
