//! Step scheduling for planned workflows.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use agentrun_control_plane::{RouteResponse, Router, RouterError};
use agentrun_core::{AgentRequest, Step, StepId, StepOutcome, WorkerId, WorkflowId, WorkflowRecord};

use crate::config::ExecutionMode;
use crate::error::OrchestratorError;

/// Check that step ids are unique, every dependency names a step of the
/// plan and the dependency graph is acyclic.
///
/// Returns the steps in a valid execution order (plan order among peers).
pub fn validate_plan(steps: &[Step]) -> Result<Vec<StepId>, OrchestratorError> {
    let mut ids: HashSet<&StepId> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !ids.insert(&step.step_id) {
            return Err(OrchestratorError::PlanInvalid(format!(
                "duplicate step id '{}'",
                step.step_id
            )));
        }
    }

    let mut in_degree: HashMap<&StepId, usize> = HashMap::with_capacity(steps.len());
    let mut dependents: HashMap<&StepId, Vec<&StepId>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep) {
                return Err(OrchestratorError::PlanInvalid(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.step_id, dep
                )));
            }
            dependents.entry(dep).or_default().push(&step.step_id);
        }
        in_degree.insert(&step.step_id, step.depends_on.len());
    }

    let mut queue: VecDeque<&StepId> = steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| &s.step_id)
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(step_id) = queue.pop_front() {
        order.push(step_id.clone());
        for &dependent in dependents.get(step_id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if order.len() < steps.len() {
        let placed: HashSet<&StepId> = order.iter().collect();
        let cyclic: Vec<String> = steps
            .iter()
            .filter(|s| !placed.contains(&s.step_id))
            .map(|s| s.step_id.to_string())
            .collect();
        return Err(OrchestratorError::PlanInvalid(format!(
            "dependency cycle among steps: {}",
            cyclic.join(", ")
        )));
    }

    Ok(order)
}

/// Sends one step through the router and turns the result into a `StepOutcome`.
#[derive(Clone)]
pub struct StepDispatcher {
    router: Arc<Router>,
    timeout: Duration,
}

impl StepDispatcher {
    pub fn new(router: Arc<Router>, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    /// Dispatch `step`. Router errors become failed outcomes.
    pub async fn dispatch(
        &self,
        workflow_id: &WorkflowId,
        step: &Step,
        dependency_results: Value,
    ) -> StepOutcome {
        let result = self.send(workflow_id, step, dependency_results).await;
        self.outcome(workflow_id, step, result)
    }

    /// Route `step` without interpreting the result.
    ///
    /// A target naming a registered worker is routed to that worker;
    /// anything else is treated as a capability.
    pub async fn send(
        &self,
        workflow_id: &WorkflowId,
        step: &Step,
        dependency_results: Value,
    ) -> Result<RouteResponse, RouterError> {
        let request = AgentRequest::new(step.action.clone(), step.payload.clone()).with_context(
            json!({
                "workflow_id": workflow_id,
                "step_id": step.step_id,
                "dependency_results": dependency_results,
            }),
        );

        let named_worker = WorkerId::new(step.target.as_str());
        if self.router.registry().get(&named_worker).await.is_some() {
            self.router
                .route_to_worker(&named_worker, request, self.timeout)
                .await
        } else {
            self.router.route(&step.target, request, self.timeout).await
        }
    }

    /// Turn a routing result into the step's recorded outcome.
    pub fn outcome(
        &self,
        workflow_id: &WorkflowId,
        step: &Step,
        result: Result<RouteResponse, RouterError>,
    ) -> StepOutcome {
        match result {
            Ok(response) => {
                info!(
                    workflow_id = %workflow_id,
                    step_id = %step.step_id,
                    worker_id = %response.worker_id,
                    elapsed_ms = response.elapsed_ms,
                    "Step completed"
                );
                StepOutcome::succeeded(response.worker_id, &step.action, response.data)
            }
            Err(e) => {
                warn!(
                    workflow_id = %workflow_id,
                    step_id = %step.step_id,
                    target_name = %step.target,
                    error = %e,
                    "Step failed"
                );
                StepOutcome::failed(e.worker().cloned(), &step.action, e.to_string())
            }
        }
    }
}

/// Data produced by the completed dependencies of `step`, keyed by step id.
fn dependency_results(record: &WorkflowRecord, step: &Step) -> Value {
    let mut results = Map::new();
    for dep in &step.depends_on {
        if let Some(data) = record.results.get(dep).and_then(|o| o.data.clone()) {
            results.insert(dep.to_string(), data);
        }
    }
    Value::Object(results)
}

/// Runs the steps of a workflow record, filling in `record.results`.
pub struct Scheduler {
    dispatcher: StepDispatcher,
    max_parallel_steps: usize,
}

impl Scheduler {
    pub fn new(dispatcher: StepDispatcher, max_parallel_steps: usize) -> Self {
        Self {
            dispatcher,
            max_parallel_steps: max_parallel_steps.max(1),
        }
    }

    pub async fn run(
        &self,
        mode: ExecutionMode,
        record: &mut WorkflowRecord,
    ) -> Result<(), OrchestratorError> {
        match mode {
            ExecutionMode::Dag => self.run_dag(record).await,
            ExecutionMode::SinglePass => {
                self.run_single_pass(record).await;
                Ok(())
            }
        }
    }

    /// Dispatch ready steps with at most `max_parallel_steps` in flight.
    /// Dependents of a failed step never become ready and stay unexecuted.
    ///
    /// A step that finds no idle worker while other steps are running is
    /// deferred until one of them finishes, since the worker it needs may be
    /// busy with a sibling step. It only fails with `NoAgentAvailable` when
    /// nothing else is in flight.
    async fn run_dag(&self, record: &mut WorkflowRecord) -> Result<(), OrchestratorError> {
        validate_plan(&record.steps)?;

        let mut waiting_on: HashMap<StepId, usize> = record
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), s.depends_on.len()))
            .collect();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for step in &record.steps {
            for dep in &step.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.step_id.clone());
            }
        }

        let mut ready: VecDeque<StepId> = record
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.step_id.clone())
            .collect();
        let mut deferred: Vec<StepId> = Vec::new();
        let mut in_flight: JoinSet<(StepId, Result<RouteResponse, RouterError>)> = JoinSet::new();

        loop {
            if in_flight.is_empty() && ready.is_empty() {
                ready.extend(deferred.drain(..));
            }

            while in_flight.len() < self.max_parallel_steps {
                let Some(step_id) = ready.pop_front() else {
                    break;
                };
                let Some(step) = record.step(&step_id).cloned() else {
                    continue;
                };
                let deps = dependency_results(record, &step);
                let dispatcher = self.dispatcher.clone();
                let workflow_id = record.id.clone();

                debug!(workflow_id = %workflow_id, step_id = %step_id, "Dispatching step");
                in_flight.spawn(async move {
                    let result = dispatcher.send(&workflow_id, &step, deps).await;
                    (step.step_id, result)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (step_id, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!(workflow_id = %record.id, error = %e, "Step task panicked");
                    continue;
                }
            };

            if matches!(result, Err(RouterError::NoAgentAvailable(_))) && !in_flight.is_empty() {
                debug!(
                    workflow_id = %record.id,
                    step_id = %step_id,
                    in_flight = in_flight.len(),
                    "No idle worker, deferring step"
                );
                deferred.push(step_id);
                continue;
            }

            // A finished step may have freed the worker a deferred step needs.
            for id in deferred.drain(..).rev() {
                ready.push_front(id);
            }

            let Some(step) = record.step(&step_id).cloned() else {
                continue;
            };
            let outcome = self.dispatcher.outcome(&record.id, &step, result);
            let succeeded = outcome.success;
            record.results.insert(step_id.clone(), outcome);
            if !succeeded {
                continue;
            }
            for dependent in dependents.get(&step_id).into_iter().flatten() {
                if let Some(remaining) = waiting_on.get_mut(dependent) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        ready.push_back(dependent.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Legacy pass: plan order, each step visited once, unmet dependencies skip.
    async fn run_single_pass(&self, record: &mut WorkflowRecord) {
        let mut completed: BTreeSet<StepId> = BTreeSet::new();

        for step in record.steps.clone() {
            if !step.depends_on.iter().all(|d| completed.contains(d)) {
                debug!(
                    workflow_id = %record.id,
                    step_id = %step.step_id,
                    "Dependencies not met, skipping step"
                );
                continue;
            }

            let deps = dependency_results(record, &step);
            let outcome = self.dispatcher.dispatch(&record.id, &step, deps).await;
            if outcome.success {
                completed.insert(step.step_id.clone());
            }
            record.results.insert(step.step_id, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(order: &[StepId]) -> Vec<&str> {
        order.iter().map(StepId::as_str).collect()
    }

    #[test]
    fn test_validate_orders_dependencies_first() {
        let steps = vec![
            Step::new("b", "pricing", "calculate_pricing").depends_on("a"),
            Step::new("a", "lead_analysis", "analyze_lead"),
            Step::new("c", "quotation_generation", "generate_quotation")
                .depends_on("a")
                .depends_on("b"),
        ];
        let order = validate_plan(&steps).unwrap();
        assert_eq!(ids(&order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let steps = vec![
            Step::new("a", "x", "x").depends_on("b"),
            Step::new("b", "x", "x").depends_on("a"),
            Step::new("c", "x", "x"),
        ];
        let err = validate_plan(&steps).unwrap_err();
        match err {
            OrchestratorError::PlanInvalid(msg) => {
                assert!(msg.ends_with("a, b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let steps = vec![Step::new("a", "x", "x").depends_on("a")];
        assert!(matches!(
            validate_plan(&steps),
            Err(OrchestratorError::PlanInvalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let steps = vec![Step::new("a", "x", "x").depends_on("ghost")];
        let err = validate_plan(&steps).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let steps = vec![Step::new("a", "x", "x"), Step::new("a", "y", "y")];
        assert!(validate_plan(&steps)
            .unwrap_err()
            .to_string()
            .contains("duplicate"));
    }
}
