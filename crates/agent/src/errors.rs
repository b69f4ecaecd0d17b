//! Errors emitted by the agent loop.

use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// Too many consecutive steps in which every action failed.
    #[error("agent stalled after {failures} consecutive failed steps")]
    Stalled { failures: u32 },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("browser error: {0}")]
    Browser(String),
}
