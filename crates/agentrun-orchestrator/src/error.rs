//! Orchestrator error types.

use thiserror::Error;

/// Errors from the reasoning collaborator.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("reasoning service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("reasoning service returned no choices")]
    EmptyResponse,

    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),
}

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Reasoning failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Could not parse workflow plan: {0}")]
    PlanParse(String),

    #[error("Could not parse follow-up: {0}")]
    FollowUpParse(String),

    #[error("Invalid workflow plan: {0}")]
    PlanInvalid(String),
}
