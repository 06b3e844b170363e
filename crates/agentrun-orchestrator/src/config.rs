//! Orchestrator configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a planned workflow is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Validate the dependency graph, then run ready steps concurrently.
    #[default]
    Dag,
    /// Walk the steps once in plan order, skipping any step whose
    /// dependencies have not completed yet. Skipped steps are never retried.
    SinglePass,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dag => f.write_str("dag"),
            Self::SinglePass => f.write_str("single_pass"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "dag" => Ok(Self::Dag),
            "single_pass" => Ok(Self::SinglePass),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout applied to each routed step (milliseconds).
    pub step_timeout_ms: u64,

    pub execution_mode: ExecutionMode,

    /// Ceiling on steps in flight at once (DAG mode).
    pub max_parallel_steps: usize,

    /// Capability targeted by the one-step plan used when planning output is unusable.
    pub fallback_capability: String,

    /// Action of the fallback step.
    pub fallback_action: String,

    /// Model name passed to the reasoning collaborator.
    pub model: String,
}

impl Config {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            execution_mode: ExecutionMode::default(),
            max_parallel_steps: 4,
            fallback_capability: "general_assistance".to_string(),
            fallback_action: "process_request".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}
