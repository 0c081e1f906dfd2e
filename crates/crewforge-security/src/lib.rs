//! Access-control primitives for crewforge.
//!
//! Provides tool permission sets and the per-worker request rate limiter
//! shared by every task a worker handles.
//!
//! # Main types
//!
//! - [`ToolPermissions`]: A set of capability names a worker or task may invoke.
//! - [`RateLimiter`]: Per-worker token bucket that delays requests instead of dropping them.

/// Tool permission sets.
pub mod capability;
/// Per-worker token-bucket rate limiting.
pub mod rate_limit;

pub use capability::ToolPermissions;
pub use rate_limit::RateLimiter;
