//! Workflow, step and business-request types.

use crate::ids::{StepId, WorkerId, WorkflowId};
use crate::status::{Priority, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A business request entering the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRequest {
    /// Kind of request (e.g. "new_lead", "quotation_request").
    pub request_type: String,

    /// Free-text description handed to the planner.
    #[serde(default)]
    pub description: String,

    /// Structured request data.
    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub priority: Priority,
}

impl BusinessRequest {
    pub fn new(request_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            description: description.into(),
            payload: Value::Null,
            priority: Priority::default(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// One unit of work in a workflow, delegated to a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,

    /// Capability name, or the id of a specific worker.
    pub target: String,

    pub action: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,

    #[serde(default)]
    pub estimated_duration_ms: u64,
}

impl Step {
    pub fn new(
        step_id: impl Into<StepId>,
        target: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            target: target.into(),
            action: action.into(),
            payload: Value::Null,
            depends_on: BTreeSet::new(),
            estimated_duration_ms: 0,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<StepId>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }
}

/// Recorded result of a dispatched step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub worker: Option<WorkerId>,
    pub action: String,
}

impl StepOutcome {
    pub fn succeeded(worker: WorkerId, action: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            executed_at: Utc::now(),
            worker: Some(worker),
            action: action.into(),
        }
    }

    pub fn failed(worker: Option<WorkerId>, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            executed_at: Utc::now(),
            worker,
            action: action.into(),
        }
    }
}

/// A planned workflow and, once executed, its step results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub priority: Priority,
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    pub results: BTreeMap<StepId, StepOutcome>,
    /// True when the planner output was unusable and a one-step plan was substituted.
    #[serde(default)]
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a planned workflow.
    pub fn new(priority: Priority, steps: Vec<Step>) -> Self {
        Self {
            id: WorkflowId::generate(),
            priority,
            steps,
            status: WorkflowStatus::Planned,
            results: BTreeMap::new(),
            fallback: false,
            created_at: Utc::now(),
        }
    }

    /// One-step plan sending the whole request to `capability`.
    pub fn fallback(priority: Priority, capability: &str, action: &str, payload: Value) -> Self {
        let step = Step::new("step_1", capability, action).with_payload(payload);
        let mut record = Self::new(priority, vec![step]);
        record.fallback = true;
        record
    }

    pub fn step(&self, step_id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.step_id == step_id)
    }

    /// Ids of the steps that completed successfully.
    pub fn completed_steps(&self) -> BTreeSet<StepId> {
        self.results
            .iter()
            .filter(|(_, outcome)| outcome.success)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sum of the planner's duration estimates.
    pub fn estimated_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_duration_ms).sum()
    }
}

/// Terminal summary of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub success: bool,
    pub total_steps: usize,
    pub completed_steps: BTreeSet<StepId>,
    pub failed_steps: BTreeSet<StepId>,
    pub skipped_steps: BTreeSet<StepId>,
    pub results: BTreeMap<StepId, StepOutcome>,
    pub fallback: bool,
}

impl WorkflowReport {
    /// Summarize an executed workflow.
    pub fn from_record(record: &WorkflowRecord) -> Self {
        let completed_steps = record.completed_steps();
        let failed_steps: BTreeSet<StepId> = record
            .results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(id, _)| id.clone())
            .collect();
        let skipped_steps = record
            .steps
            .iter()
            .map(|s| s.step_id.clone())
            .filter(|id| !record.results.contains_key(id))
            .collect();

        Self {
            workflow_id: record.id.clone(),
            status: record.status,
            success: completed_steps.len() == record.steps.len(),
            total_steps: record.steps.len(),
            completed_steps,
            failed_steps,
            skipped_steps,
            results: record.results.clone(),
            fallback: record.fallback,
        }
    }
}

/// A follow-up action proposed after a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl RecommendedAction {
    pub fn new(action: impl Into<String>, priority: Priority, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            priority,
            description: description.into(),
            target: None,
        }
    }
}

/// Interpretation of workflow results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub summary: String,
    pub recommended_actions: Vec<RecommendedAction>,
}

/// What the orchestrator returns for a business request. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub success: bool,
    pub workflow: Option<WorkflowReport>,
    pub follow_up: FollowUp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
