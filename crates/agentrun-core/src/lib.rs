//! AgentRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - Network transports
//! - Persistence
//!
//! Everything the registry, worker runtimes and orchestrator exchange is
//! defined here.

pub mod actions;
pub mod chat;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod task;
pub mod worker;
pub mod workflow;

// Re-export commonly used types
pub use chat::{ChatMessage, ChatOptions, ChatResponse, ChatRole};
pub use error::CoreError;
pub use event::{Event, EventKind, LogLevel};
pub use ids::{StepId, TaskId, WorkerId, WorkflowId};
pub use status::{Priority, RuntimeStatus, WorkerStatus, WorkflowStatus};
pub use task::{AgentRequest, TaskError, TaskErrorKind, TaskOutcome, TaskRecord, WorkerMetrics};
pub use worker::{PerformanceStats, WorkerDescriptor};
pub use workflow::{
    BusinessRequest, FollowUp, OrchestrationResponse, RecommendedAction, Step, StepOutcome,
    WorkflowRecord, WorkflowReport,
};
