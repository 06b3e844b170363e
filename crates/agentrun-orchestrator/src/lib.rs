//! AgentRun Orchestrator Library
//!
//! Plans business requests into multi-step workflows through a reasoning
//! collaborator, executes the steps through the control plane router while
//! honoring declared dependencies, and asks for follow-up recommendations.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod reasoning;
pub mod scheduler;

pub use config::{Config, ExecutionMode};
pub use error::{OrchestratorError, ReasoningError};
pub use orchestrator::Orchestrator;
pub use reasoning::{HttpReasoningClient, ReasoningClient, ScriptedReasoningClient};
pub use scheduler::{validate_plan, Scheduler, StepDispatcher};
