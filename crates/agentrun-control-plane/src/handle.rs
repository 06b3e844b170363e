//! Capability interfaces a worker implementation exposes to the control plane.

use agentrun_core::{AgentRequest, RuntimeStatus, TaskOutcome, WorkerDescriptor, WorkerMetrics};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Something the router can dispatch requests to.
#[async_trait]
pub trait Routable: Send + Sync {
    /// Execute a request. Failures are reported in the envelope, never raised.
    ///
    /// Implementations must stop work promptly once `cancel` fires.
    async fn execute(&self, request: AgentRequest, cancel: CancellationToken) -> TaskOutcome;
}

/// Something that can describe itself to the registry.
pub trait Registrable {
    fn descriptor(&self) -> WorkerDescriptor;
}

/// Point-in-time health of a worker runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: RuntimeStatus,
    pub active_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub backlog: usize,
    pub metrics: WorkerMetrics,
}

impl HealthReport {
    /// Ready and not saturated.
    pub fn is_healthy(&self) -> bool {
        self.status == RuntimeStatus::Ready && self.active_tasks <= self.max_concurrent_tasks
    }
}

/// Something that can report its own health.
pub trait HealthCheckable {
    fn health(&self) -> HealthReport;
}
