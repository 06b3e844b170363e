//! Workflow orchestrator: plan, execute, interpret.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use agentrun_control_plane::Router;
use agentrun_core::{
    BusinessRequest, ChatOptions, FollowUp, OrchestrationResponse, WorkflowRecord,
    WorkflowReport, WorkflowStatus,
};

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::planner;
use crate::reasoning::ReasoningClient;
use crate::scheduler::{Scheduler, StepDispatcher};

/// Turns business requests into executed workflows.
pub struct Orchestrator {
    router: Arc<Router>,
    reasoning: Arc<dyn ReasoningClient>,
    scheduler: Scheduler,
    config: Config,
}

impl Orchestrator {
    pub fn new(router: Arc<Router>, reasoning: Arc<dyn ReasoningClient>, config: Config) -> Self {
        let dispatcher = StepDispatcher::new(router.clone(), config.step_timeout());
        let scheduler = Scheduler::new(dispatcher, config.max_parallel_steps);
        Self {
            router,
            reasoning,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ask the reasoning collaborator for a plan.
    ///
    /// Unusable output falls back to a one-step plan against the fallback
    /// capability. Only a collaborator failure is returned as an error.
    pub async fn plan_workflow(
        &self,
        request: &BusinessRequest,
    ) -> Result<WorkflowRecord, OrchestratorError> {
        let capabilities = self.router.registry().capabilities().await;
        let messages = planner::planning_messages(request, &capabilities);
        let reply = self.reasoning.chat(messages, ChatOptions::default()).await?;

        let record = match planner::parse_plan(&reply.content) {
            Ok(draft) => {
                WorkflowRecord::new(draft.priority.unwrap_or(request.priority), draft.steps)
            }
            Err(e) => {
                warn!(
                    request_type = %request.request_type,
                    error = %e,
                    "Planner output unusable, using fallback plan"
                );
                WorkflowRecord::fallback(
                    request.priority,
                    &self.config.fallback_capability,
                    &self.config.fallback_action,
                    json!({
                        "request_type": request.request_type,
                        "description": request.description,
                        "payload": request.payload,
                    }),
                )
            }
        };

        info!(
            workflow_id = %record.id,
            priority = %record.priority,
            steps = record.steps.len(),
            fallback = record.fallback,
            estimated_duration_ms = record.estimated_duration_ms(),
            "Workflow planned"
        );
        Ok(record)
    }

    /// Run a planned workflow to its terminal state.
    pub async fn execute_workflow(
        &self,
        mut record: WorkflowRecord,
    ) -> Result<WorkflowReport, OrchestratorError> {
        record.status = WorkflowStatus::Executing;
        info!(
            workflow_id = %record.id,
            mode = %self.config.execution_mode,
            "Executing workflow"
        );

        self.scheduler
            .run(self.config.execution_mode, &mut record)
            .await?;
        record.status = WorkflowStatus::Completed;

        let report = WorkflowReport::from_record(&record);
        info!(
            workflow_id = %report.workflow_id,
            success = report.success,
            completed = report.completed_steps.len(),
            failed = report.failed_steps.len(),
            skipped = report.skipped_steps.len(),
            "Workflow completed"
        );
        Ok(report)
    }

    /// Ask the collaborator to interpret the results. Never fails: an
    /// unreachable collaborator or unusable reply yields a conservative default.
    pub async fn coordinate_follow_up(
        &self,
        report: &WorkflowReport,
        request: &BusinessRequest,
    ) -> FollowUp {
        let messages = planner::follow_up_messages(report, request);
        let reply = match self.reasoning.chat(messages, ChatOptions::default()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(workflow_id = %report.workflow_id, error = %e, "Follow-up unavailable");
                return planner::default_follow_up(report);
            }
        };

        planner::parse_follow_up(&reply.content).unwrap_or_else(|e| {
            warn!(workflow_id = %report.workflow_id, error = %e, "Follow-up output unusable");
            planner::default_follow_up(report)
        })
    }

    /// Plan, execute and interpret a business request.
    pub async fn handle_request(&self, request: BusinessRequest) -> OrchestrationResponse {
        info!(
            request_type = %request.request_type,
            priority = %request.priority,
            "Handling business request"
        );

        match self.plan_and_execute(&request).await {
            Ok(report) => {
                let follow_up = self.coordinate_follow_up(&report, &request).await;
                OrchestrationResponse {
                    success: report.success,
                    workflow: Some(report),
                    follow_up,
                    error: None,
                }
            }
            Err(e) => {
                error!(request_type = %request.request_type, error = %e, "Request failed");
                let message = e.to_string();
                OrchestrationResponse {
                    success: false,
                    workflow: None,
                    follow_up: planner::remediation(&message),
                    error: Some(message),
                }
            }
        }
    }

    async fn plan_and_execute(
        &self,
        request: &BusinessRequest,
    ) -> Result<WorkflowReport, OrchestratorError> {
        let plan = self.plan_workflow(request).await?;
        self.execute_workflow(plan).await
    }
}
