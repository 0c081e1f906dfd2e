//! Human-in-the-loop input types.
//!
//! These types live in `crewforge-core` so that the tool crate (which wraps a
//! channel as the `human` capability) and front-ends (which implement the
//! channel) can share them without depending on each other.

use crate::CrewResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A question put to a human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanQuery {
    /// Question put to the person.
    pub prompt: String,
}

/// The operator's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanReply {
    /// The person's answer.
    pub answer: String,
    /// Who answered.
    pub responder: String,
}

/// Channel through which questions reach a human and answers come back.
/// Implementations can be terminal prompts, chat bridges, web forms, etc.
///
/// Implementations may wait indefinitely; callers bound the wait.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Put a question to a person and wait for the reply.
    async fn ask(&self, query: HumanQuery) -> CrewResult<HumanReply>;
}
