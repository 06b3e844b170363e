//! End-to-end workflow tests against real worker runtimes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agentrun_control_plane::{EventBus, Registry, Router};
use agentrun_core::{BusinessRequest, Priority, StepId, WorkerDescriptor};
use agentrun_orchestrator::{
    Config, ExecutionMode, Orchestrator, OrchestratorError, ScriptedReasoningClient,
};
use agentrun_worker::{
    handler_fn, ActionContext, ActionHandler, HandlerError, HandlerMap, TaskRuntime,
};

struct Harness {
    registry: Arc<Registry>,
    router: Arc<Router>,
    runtimes: Vec<Arc<TaskRuntime>>,
}

impl Harness {
    fn new() -> Self {
        let registry = Registry::new(EventBus::default());
        let router = Arc::new(Router::new(registry.clone(), Duration::from_secs(5)));
        Self {
            registry,
            router,
            runtimes: Vec::new(),
        }
    }

    async fn worker(
        &mut self,
        id: &str,
        capability: &str,
        action: &str,
        handler: Arc<dyn ActionHandler>,
    ) {
        let descriptor = WorkerDescriptor::new(id, "test")
            .with_id(id)
            .with_capability(capability);
        let runtime = TaskRuntime::new(
            descriptor,
            HandlerMap::new().with(action, handler),
            self.registry.clone(),
            agentrun_worker::Config::default(),
        );
        runtime.start().await.unwrap();
        self.runtimes.push(runtime);
    }

    fn orchestrator(&self, replies: Vec<String>, mode: ExecutionMode) -> Orchestrator {
        let config = Config {
            execution_mode: mode,
            ..Config::default()
        };
        Orchestrator::new(
            self.router.clone(),
            Arc::new(ScriptedReasoningClient::new(replies)),
            config,
        )
    }
}

fn echo(tag: &'static str) -> Arc<dyn ActionHandler> {
    handler_fn(move |ctx: ActionContext| async move {
        Ok::<_, HandlerError>(json!({ "tag": tag, "context": ctx.context }))
    })
}

fn plan(steps: Value) -> String {
    json!({ "priority": "high", "steps": steps }).to_string()
}

fn ids(items: &[&str]) -> BTreeSet<StepId> {
    items.iter().map(|s| StepId::new(*s)).collect()
}

fn request() -> BusinessRequest {
    BusinessRequest::new("quotation_request", "Quote two excavators for Acme")
}

#[tokio::test]
async fn test_dependent_steps_complete_in_order() {
    let mut harness = Harness::new();
    harness
        .worker("lead-1", "lead_analysis", "analyze_lead", echo("lead"))
        .await;
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("pricing"))
        .await;

    let orchestrator = harness.orchestrator(
        vec![plan(json!([
            {"step_id": "a", "target": "lead_analysis", "action": "analyze_lead"},
            {"step_id": "b", "target": "pricing", "action": "calculate_pricing",
             "depends_on": ["a"]}
        ]))],
        ExecutionMode::Dag,
    );

    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    assert_eq!(record.priority, Priority::High);
    assert!(!record.fallback);

    let report = orchestrator.execute_workflow(record).await.unwrap();
    assert!(report.success);
    assert_eq!(report.completed_steps, ids(&["a", "b"]));

    // b sees a's output in its context.
    let b = report.results[&StepId::new("b")].data.clone().unwrap();
    assert_eq!(b["context"]["dependency_results"]["a"]["tag"], "lead");
    assert_eq!(b["context"]["step_id"], "b");
}

#[tokio::test]
async fn test_out_of_order_plan_single_pass_vs_dag() {
    let mut harness = Harness::new();
    harness
        .worker("lead-1", "lead_analysis", "analyze_lead", echo("lead"))
        .await;
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("pricing"))
        .await;

    let steps = json!([
        {"step_id": "b", "target": "pricing", "action": "calculate_pricing",
         "depends_on": ["a"]},
        {"step_id": "a", "target": "lead_analysis", "action": "analyze_lead"}
    ]);

    let single = harness.orchestrator(vec![plan(steps.clone())], ExecutionMode::SinglePass);
    let record = single.plan_workflow(&request()).await.unwrap();
    let report = single.execute_workflow(record).await.unwrap();
    assert_eq!(report.completed_steps, ids(&["a"]));
    assert_eq!(report.skipped_steps, ids(&["b"]));
    assert!(!report.success);

    let dag = harness.orchestrator(vec![plan(steps)], ExecutionMode::Dag);
    let record = dag.plan_workflow(&request()).await.unwrap();
    let report = dag.execute_workflow(record).await.unwrap();
    assert_eq!(report.completed_steps, ids(&["a", "b"]));
    assert!(report.success);
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected_with_remediation() {
    let mut harness = Harness::new();
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("pricing"))
        .await;

    let cyclic = plan(json!([
        {"step_id": "a", "target": "pricing", "action": "calculate_pricing", "depends_on": ["b"]},
        {"step_id": "b", "target": "pricing", "action": "calculate_pricing", "depends_on": ["a"]}
    ]));

    let orchestrator = harness.orchestrator(vec![cyclic.clone()], ExecutionMode::Dag);
    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    let err = orchestrator.execute_workflow(record).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::PlanInvalid(_)));

    let orchestrator = harness.orchestrator(vec![cyclic], ExecutionMode::Dag);
    let response = orchestrator.handle_request(request()).await;
    assert!(!response.success);
    assert!(response.workflow.is_none());
    assert!(response.error.unwrap().contains("cycle"));
    let actions: Vec<&str> = response
        .follow_up
        .recommended_actions
        .iter()
        .map(|a| a.action.as_str())
        .collect();
    assert_eq!(actions, vec!["manual_review", "system_check"]);

    // Nothing was dispatched.
    assert_eq!(harness.runtimes[0].metrics().tasks_processed, 0);
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected() {
    let mut harness = Harness::new();
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("pricing"))
        .await;

    let orchestrator = harness.orchestrator(
        vec![plan(json!([
            {"step_id": "a", "target": "pricing", "action": "calculate_pricing",
             "depends_on": ["ghost"]}
        ]))],
        ExecutionMode::Dag,
    );
    let response = orchestrator.handle_request(request()).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_malformed_plan_falls_back_to_general_assistance() {
    let mut harness = Harness::new();
    harness
        .worker(
            "assistant-1",
            "general_assistance",
            "process_request",
            handler_fn(|ctx: ActionContext| async move {
                Ok::<_, HandlerError>(json!({ "handled": ctx.payload["request_type"] }))
            }),
        )
        .await;

    let orchestrator = harness.orchestrator(
        vec![
            "I'm not sure how to plan that.".to_string(),
            "also not json".to_string(),
        ],
        ExecutionMode::Dag,
    );
    let response = orchestrator.handle_request(request()).await;

    assert!(response.success);
    let report = response.workflow.unwrap();
    assert!(report.fallback);
    assert_eq!(report.total_steps, 1);
    let data = report.results[&StepId::new("step_1")].data.clone().unwrap();
    assert_eq!(data["handled"], "quotation_request");

    // Unusable follow-up output gives the conservative default.
    assert!(response.follow_up.summary.contains("1 of 1 steps completed"));
    assert!(response.follow_up.recommended_actions.is_empty());
}

#[tokio::test]
async fn test_follow_up_is_parsed_from_reply() {
    let mut harness = Harness::new();
    harness
        .worker("lead-1", "lead_analysis", "analyze_lead", echo("lead"))
        .await;

    let orchestrator = harness.orchestrator(
        vec![
            plan(json!([{"target": "lead_analysis", "action": "analyze_lead"}])),
            r#"```json
{"summary": "Lead looks strong", "recommended_actions": [
  {"action": "schedule_follow_up", "priority": "urgent", "description": "Call today"}
]}
```"#
                .to_string(),
        ],
        ExecutionMode::Dag,
    );
    let response = orchestrator.handle_request(request()).await;

    assert!(response.success);
    assert_eq!(response.follow_up.summary, "Lead looks strong");
    assert_eq!(
        response.follow_up.recommended_actions[0].priority,
        Priority::Urgent
    );
}

#[tokio::test]
async fn test_reasoning_failure_returns_remediation() {
    let harness = Harness::new();
    let reasoning = ScriptedReasoningClient::default();
    reasoning.push_error("connection refused");
    let orchestrator = Orchestrator::new(
        harness.router.clone(),
        Arc::new(reasoning),
        Config::default(),
    );

    let err = orchestrator.plan_workflow(&request()).await;
    assert!(matches!(err, Err(OrchestratorError::Reasoning(_))));

    let response = orchestrator.handle_request(request()).await;
    assert!(!response.success);
    assert!(response.workflow.is_none());
    assert_eq!(response.follow_up.recommended_actions.len(), 2);
}

#[tokio::test]
async fn test_failed_step_skips_dependents() {
    let mut harness = Harness::new();
    harness
        .worker(
            "lead-1",
            "lead_analysis",
            "analyze_lead",
            handler_fn(|_ctx: ActionContext| async move {
                Err::<Value, _>(HandlerError::Failed("CRM unreachable".to_string()))
            }),
        )
        .await;
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("pricing"))
        .await;
    harness
        .worker("comms-1", "communication", "draft_email", echo("email"))
        .await;

    let orchestrator = harness.orchestrator(
        vec![plan(json!([
            {"step_id": "a", "target": "lead_analysis", "action": "analyze_lead"},
            {"step_id": "b", "target": "pricing", "action": "calculate_pricing",
             "depends_on": ["a"]},
            {"step_id": "c", "target": "communication", "action": "draft_email"}
        ]))],
        ExecutionMode::Dag,
    );
    let response = orchestrator.handle_request(request()).await;

    assert!(!response.success);
    let report = response.workflow.unwrap();
    assert_eq!(report.failed_steps, ids(&["a"]));
    assert_eq!(report.skipped_steps, ids(&["b"]));
    assert_eq!(report.completed_steps, ids(&["c"]));
    assert!(report.results[&StepId::new("a")]
        .error
        .as_deref()
        .unwrap()
        .contains("CRM unreachable"));
}

#[tokio::test]
async fn test_unknown_capability_fails_step() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(
        vec![plan(json!([{"step_id": "a", "target": "forecasting", "action": "forecast_deal"}]))],
        ExecutionMode::Dag,
    );
    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    let report = orchestrator.execute_workflow(record).await.unwrap();

    assert_eq!(report.failed_steps, ids(&["a"]));
    let outcome = &report.results[&StepId::new("a")];
    assert!(outcome.worker.is_none());
}

#[tokio::test]
async fn test_parallel_steps_respect_limit() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut harness = Harness::new();
    for name in ["a", "b", "c", "d"] {
        let current = current.clone();
        let peak = peak.clone();
        let handler = handler_fn(move |_ctx: ActionContext| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!({}))
            }
        });
        harness
            .worker(&format!("w-{name}"), &format!("cap_{name}"), "work", handler)
            .await;
    }

    let config = Config {
        max_parallel_steps: 2,
        ..Config::default()
    };
    let reasoning = ScriptedReasoningClient::new([plan(json!([
        {"step_id": "a", "target": "cap_a", "action": "work"},
        {"step_id": "b", "target": "cap_b", "action": "work"},
        {"step_id": "c", "target": "cap_c", "action": "work"},
        {"step_id": "d", "target": "cap_d", "action": "work"}
    ]))]);
    let orchestrator = Orchestrator::new(harness.router.clone(), Arc::new(reasoning), config);

    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    let report = orchestrator.execute_workflow(record).await.unwrap();

    assert!(report.success);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_step_can_target_a_worker_by_id() {
    let mut harness = Harness::new();
    harness
        .worker("pricing-1", "pricing", "calculate_pricing", echo("first"))
        .await;
    harness
        .worker("pricing-2", "pricing", "calculate_pricing", echo("second"))
        .await;

    let orchestrator = harness.orchestrator(
        vec![plan(json!([
            {"step_id": "a", "target": "pricing-2", "action": "calculate_pricing"}
        ]))],
        ExecutionMode::Dag,
    );
    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    let report = orchestrator.execute_workflow(record).await.unwrap();

    let outcome = &report.results[&StepId::new("a")];
    assert_eq!(outcome.worker.as_ref().unwrap().as_str(), "pricing-2");
    assert_eq!(outcome.data.as_ref().unwrap()["tag"], "second");
}

#[tokio::test]
async fn test_independent_steps_share_a_single_worker() {
    let mut harness = Harness::new();
    harness
        .worker(
            "pricing-1",
            "pricing",
            "calculate_pricing",
            handler_fn(|ctx: ActionContext| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, HandlerError>(json!({ "step": ctx.context["step_id"] }))
            }),
        )
        .await;

    let orchestrator = harness.orchestrator(
        vec![plan(json!([
            {"step_id": "a", "target": "pricing", "action": "calculate_pricing"},
            {"step_id": "b", "target": "pricing", "action": "calculate_pricing"},
            {"step_id": "c", "target": "forecasting", "action": "forecast_deal"}
        ]))],
        ExecutionMode::Dag,
    );
    let record = orchestrator.plan_workflow(&request()).await.unwrap();
    let report = orchestrator.execute_workflow(record).await.unwrap();

    // The second pricing step waits for the worker instead of failing.
    assert_eq!(report.completed_steps, ids(&["a", "b"]));
    assert_eq!(report.results[&StepId::new("b")].data.as_ref().unwrap()["step"], "b");

    // A capability nobody serves still fails once nothing else is running.
    assert_eq!(report.failed_steps, ids(&["c"]));
    assert!(report.results[&StepId::new("c")]
        .error
        .as_deref()
        .unwrap()
        .contains("No agent available"));

    let pricing = harness
        .registry
        .get(&agentrun_core::WorkerId::new("pricing-1"))
        .await
        .unwrap();
    assert_eq!(pricing.performance.total_count, 2);
}
