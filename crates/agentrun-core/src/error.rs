//! Core domain errors.

use thiserror::Error;

/// Core domain errors for AgentRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Worker not found.
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
