//! Task records, requests and the result envelope returned by workers.

use crate::worker::incremental_mean;
use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A request dispatched to a worker: a named action with its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Action name, resolved against the worker's handler map.
    pub action: String,

    /// Action input.
    #[serde(default)]
    pub payload: Value,

    /// Caller context (workflow id, step id, original request, ...).
    #[serde(default)]
    pub context: Value,
}

impl AgentRequest {
    /// Create a request with an empty context.
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
            context: Value::Null,
        }
    }

    /// Builder method to set the context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// A task held by a worker runtime. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub action: String,
    pub payload: Value,
    pub context: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a new task record stamped with the current time.
    pub fn new(action: impl Into<String>, payload: Value, context: Value) -> Self {
        Self {
            id: TaskId::generate(),
            action: action.into(),
            payload,
            context,
            enqueued_at: Utc::now(),
        }
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The worker has no handler for the action.
    UnsupportedAction,
    /// The handler returned an error.
    ExecutionFailure,
    /// The task was cancelled before finishing.
    Cancelled,
    /// The backlog was full and the task was rejected.
    BacklogFull,
    /// The task was evicted from a full backlog.
    Dropped,
    /// The runtime was not accepting work.
    RuntimeNotReady,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnsupportedAction => "unsupported_action",
            Self::ExecutionFailure => "execution_failure",
            Self::Cancelled => "cancelled",
            Self::BacklogFull => "backlog_full",
            Self::Dropped => "dropped",
            Self::RuntimeNotReady => "runtime_not_ready",
        };
        f.write_str(s)
    }
}

/// Error half of a task envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result envelope for a task. Workers never raise; every failure is captured here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub response_time_ms: u64,
}

impl TaskOutcome {
    /// Successful envelope.
    pub fn success(task_id: TaskId, data: Value, response_time_ms: u64) -> Self {
        Self {
            task_id,
            success: true,
            data: Some(data),
            error: None,
            response_time_ms,
        }
    }

    /// Failed envelope.
    pub fn failure(task_id: TaskId, error: TaskError, response_time_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            data: None,
            error: Some(error),
            response_time_ms,
        }
    }

    /// Kind of the failure, if any.
    pub fn error_kind(&self) -> Option<TaskErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Metrics kept locally by one worker runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub tasks_processed: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub average_response_time_ms: f64,
}

impl WorkerMetrics {
    /// Fold one task result into the metrics.
    pub fn record(&mut self, success: bool, response_time_ms: u64) {
        self.tasks_processed += 1;
        if success {
            self.successful_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.average_response_time_ms = incremental_mean(
            self.average_response_time_ms,
            self.tasks_processed,
            response_time_ms as f64,
        );
    }

    /// Success percentage in `[0, 100]`.
    pub fn success_rate(&self) -> f64 {
        if self.tasks_processed == 0 {
            return 0.0;
        }
        self.successful_tasks as f64 / self.tasks_processed as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_envelope_serialization_omits_data() {
        let outcome = TaskOutcome::failure(
            TaskId::new("t-1"),
            TaskError::new(TaskErrorKind::UnsupportedAction, "no handler for 'fly'"),
            0,
        );
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["kind"], json!("unsupported_action"));
        assert!(value.get("data").is_none());
        assert_eq!(outcome.error_kind(), Some(TaskErrorKind::UnsupportedAction));
    }

    #[test]
    fn test_worker_metrics_record() {
        let mut metrics = WorkerMetrics::default();
        metrics.record(true, 20);
        metrics.record(false, 40);
        assert_eq!(metrics.tasks_processed, 2);
        assert_eq!(metrics.successful_tasks, 1);
        assert_eq!(metrics.failed_tasks, 1);
        assert_eq!(metrics.average_response_time_ms, 30.0);
        assert_eq!(metrics.success_rate(), 50.0);
    }

    #[test]
    fn test_request_deserializes_without_context() {
        let req: AgentRequest =
            serde_json::from_value(json!({"action": "calculate_pricing"})).unwrap();
        assert_eq!(req.action, "calculate_pricing");
        assert_eq!(req.payload, Value::Null);
    }
}
