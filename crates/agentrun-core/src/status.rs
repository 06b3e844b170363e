//! Status enums for workers, task runtimes and workflows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a worker as tracked by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Worker is ready to be selected by discovery.
    #[default]
    Active,
    /// Worker is currently handling a routed request.
    Busy,
    /// Last routed request failed.
    Error,
    /// Demoted by the health monitor (stale).
    Inactive,
}

impl WorkerStatus {
    /// Returns true if discovery may select the worker.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Lowercase label, used by logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Inactive => "inactive",
        }
    }

    /// All statuses, in display order.
    pub fn all() -> [WorkerStatus; 4] {
        [Self::Active, Self::Busy, Self::Error, Self::Inactive]
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a per-worker task runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    #[default]
    Initialized,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl RuntimeStatus {
    /// Returns true if the runtime accepts new tasks.
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if `start()` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Initialized | Self::Stopped)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Status of a workflow.
///
/// There is no failed state: `Completed` means the execution pass ended,
/// whether or not every step succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Planned,
    Executing,
    Completed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Business priority attached to requests, workflows and follow-up actions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Lenient parse used for collaborator output; unknown values map to `Medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" | "critical" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}
