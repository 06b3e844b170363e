//! Events published by the registry, router and worker runtimes.

use crate::ids::{TaskId, WorkerId};
use crate::status::WorkerStatus;
use crate::task::TaskErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a `Log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WorkerRegistered {
        worker_id: WorkerId,
        name: String,
    },
    WorkerUnregistered {
        worker_id: WorkerId,
    },
    WorkerStatusChanged {
        worker_id: WorkerId,
        from: WorkerStatus,
        to: WorkerStatus,
    },
    RequestFailed {
        capability: String,
        worker_id: Option<WorkerId>,
        error: String,
    },
    TaskCompleted {
        worker_id: WorkerId,
        task_id: TaskId,
        action: String,
        response_time_ms: u64,
    },
    TaskFailed {
        worker_id: WorkerId,
        task_id: TaskId,
        action: String,
        kind: TaskErrorKind,
        error: String,
    },
    Log {
        level: LogLevel,
        source: String,
        message: String,
    },
}

/// An event with the time it was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Stamp an event kind with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Create a `Log` event.
    pub fn log(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::now(EventKind::Log {
            level,
            source: source.into(),
            message: message.into(),
        })
    }

    /// Short name of the event type.
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::WorkerRegistered { .. } => "WorkerRegistered",
            EventKind::WorkerUnregistered { .. } => "WorkerUnregistered",
            EventKind::WorkerStatusChanged { .. } => "WorkerStatusChanged",
            EventKind::RequestFailed { .. } => "RequestFailed",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskFailed { .. } => "TaskFailed",
            EventKind::Log { .. } => "Log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_changed_serialization() {
        let event = Event::now(EventKind::WorkerStatusChanged {
            worker_id: WorkerId::new("w-1"),
            from: WorkerStatus::Active,
            to: WorkerStatus::Busy,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "worker_status_changed");
        assert_eq!(value["from"], "active");
        assert_eq!(value["to"], "busy");
        assert_eq!(event.name(), "WorkerStatusChanged");
    }

    #[test]
    fn test_log_event() {
        let event = Event::log(LogLevel::Warn, "health", "worker stale");
        assert_eq!(event.name(), "Log");
        assert!(matches!(
            event.kind,
            EventKind::Log {
                level: LogLevel::Warn,
                ..
            }
        ));
    }
}
