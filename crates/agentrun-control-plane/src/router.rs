//! Request router - picks the best worker for a capability and dispatches to it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentrun_core::{AgentRequest, EventKind, TaskErrorKind, WorkerId, WorkerStatus};

use crate::events::EventBus;
use crate::registry::{Registry, WorkerRecord};

/// Router errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    #[error("No agent available for: {0}")]
    NoAgentAvailable(String),

    #[error("Worker {worker} does not support action: {message}")]
    UnsupportedAction { worker: WorkerId, message: String },

    #[error("Request to worker {worker} timed out after {timeout_ms}ms")]
    RequestTimeout { worker: WorkerId, timeout_ms: u64 },

    #[error("Worker {worker} failed: {message}")]
    ExecutionFailure { worker: WorkerId, message: String },
}

impl RouterError {
    /// Worker the failed request was dispatched to, if any.
    pub fn worker(&self) -> Option<&WorkerId> {
        match self {
            Self::NoAgentAvailable(_) => None,
            Self::UnsupportedAction { worker, .. }
            | Self::RequestTimeout { worker, .. }
            | Self::ExecutionFailure { worker, .. } => Some(worker),
        }
    }
}

/// Successful routed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub worker_id: WorkerId,
    pub data: Value,
    pub elapsed_ms: u64,
}

/// Per-worker result of a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub worker_id: WorkerId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Performance-aware request router.
pub struct Router {
    registry: Arc<Registry>,
    events: EventBus,
    default_timeout: Duration,
}

impl Router {
    /// Create a new Router.
    pub fn new(registry: Arc<Registry>, default_timeout: Duration) -> Self {
        let events = registry.events().clone();
        Self {
            registry,
            events,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Route a request to the top-ranked active worker offering `capability`.
    pub async fn route(
        &self,
        capability: &str,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<RouteResponse, RouterError> {
        let worker = match self.registry.discover(capability).await.into_iter().next() {
            Some(worker) => worker,
            None => {
                let err = RouterError::NoAgentAvailable(capability.to_string());
                self.publish_failure(capability, None, &err);
                warn!(capability = %capability, "No agent available");
                return Err(err);
            }
        };

        self.dispatch(capability, worker, request, timeout).await
    }

    /// Route a request to a specific worker, which must be active.
    pub async fn route_to_worker(
        &self,
        worker_id: &WorkerId,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<RouteResponse, RouterError> {
        let worker = match self.registry.get(worker_id).await {
            Some(worker) if worker.status.is_selectable() => worker,
            _ => {
                let err = RouterError::NoAgentAvailable(worker_id.to_string());
                self.publish_failure(worker_id.as_str(), None, &err);
                return Err(err);
            }
        };

        self.dispatch(worker_id.as_str(), worker, request, timeout).await
    }

    /// Send `request` to every active worker offering `capability`, one after another.
    ///
    /// Does not touch worker status or performance counters.
    pub async fn broadcast(&self, capability: &str, request: AgentRequest) -> Vec<BroadcastResult> {
        let candidates = self.registry.discover(capability).await;
        let mut results = Vec::with_capacity(candidates.len());

        for worker in candidates {
            let cancel = CancellationToken::new();
            let handle = worker.handle();
            let execution = handle.execute(request.clone(), cancel.clone());

            let result = match tokio::time::timeout(self.default_timeout, execution).await {
                Ok(outcome) if outcome.success => BroadcastResult {
                    worker_id: worker.id.clone(),
                    success: true,
                    result: outcome.data,
                    error: None,
                },
                Ok(outcome) => BroadcastResult {
                    worker_id: worker.id.clone(),
                    success: false,
                    result: None,
                    error: outcome.error.map(|e| e.to_string()),
                },
                Err(_) => {
                    cancel.cancel();
                    BroadcastResult {
                        worker_id: worker.id.clone(),
                        success: false,
                        result: None,
                        error: Some(format!(
                            "timed out after {}ms",
                            self.default_timeout.as_millis()
                        )),
                    }
                }
            };
            results.push(result);
        }

        info!(
            capability = %capability,
            workers = results.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            "Broadcast complete"
        );
        results
    }

    /// Mark busy, execute under a timeout, record exactly one outcome.
    async fn dispatch(
        &self,
        label: &str,
        worker: WorkerRecord,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<RouteResponse, RouterError> {
        let worker_id = worker.id.clone();
        let action = request.action.clone();

        info!(
            target_name = %label,
            worker_id = %worker_id,
            action = %action,
            score = worker.score(),
            "Routing request"
        );

        self.mark(&worker_id, WorkerStatus::Busy).await;

        let cancel = CancellationToken::new();
        let started = Instant::now();
        let result =
            tokio::time::timeout(timeout, worker.handle().execute(request, cancel.clone())).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Err(_) => {
                // Stop the losing execution instead of letting it finish in the background.
                cancel.cancel();
                self.record(&worker_id, false, elapsed_ms).await;
                self.mark(&worker_id, WorkerStatus::Active).await;

                let err = RouterError::RequestTimeout {
                    worker: worker_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                warn!(worker_id = %worker_id, action = %action, elapsed_ms, "Request timed out");
                self.publish_failure(label, Some(worker_id), &err);
                Err(err)
            }
            Ok(outcome) if outcome.success => {
                self.record(&worker_id, true, elapsed_ms).await;
                self.mark(&worker_id, WorkerStatus::Active).await;

                info!(worker_id = %worker_id, action = %action, elapsed_ms, "Request completed");
                Ok(RouteResponse {
                    worker_id,
                    data: outcome.data.unwrap_or(Value::Null),
                    elapsed_ms,
                })
            }
            Ok(outcome) => {
                self.record(&worker_id, false, elapsed_ms).await;
                self.mark(&worker_id, WorkerStatus::Error).await;

                let message = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                let err = match outcome.error_kind() {
                    Some(TaskErrorKind::UnsupportedAction) => RouterError::UnsupportedAction {
                        worker: worker_id.clone(),
                        message,
                    },
                    _ => RouterError::ExecutionFailure {
                        worker: worker_id.clone(),
                        message,
                    },
                };
                warn!(worker_id = %worker_id, action = %action, error = %err, "Request failed");
                self.publish_failure(label, Some(worker_id), &err);
                Err(err)
            }
        }
    }

    async fn mark(&self, worker_id: &WorkerId, status: WorkerStatus) {
        if let Err(e) = self.registry.set_status(worker_id, status).await {
            warn!(worker_id = %worker_id, error = %e, "Failed to update worker status");
        }
    }

    async fn record(&self, worker_id: &WorkerId, success: bool, elapsed_ms: u64) {
        if let Err(e) = self.registry.record_outcome(worker_id, success, elapsed_ms).await {
            warn!(worker_id = %worker_id, error = %e, "Failed to record outcome");
        }
    }

    fn publish_failure(&self, capability: &str, worker_id: Option<WorkerId>, err: &RouterError) {
        self.events.publish(EventKind::RequestFailed {
            capability: capability.to_string(),
            worker_id,
            error: err.to_string(),
        });
    }
}
