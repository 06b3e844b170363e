//! Sample CRM workers for the in-process demo.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use agentrun_control_plane::{Config as ControlPlaneConfig, EventBus, Registry, Router};
use agentrun_core::WorkerDescriptor;
use agentrun_worker::{
    handler_fn, ActionContext, Config as WorkerConfig, HandlerError, HandlerMap,
    InMemoryPersistence, Persistence, PersistenceResult, RuntimeError, TaskRuntime,
};

/// Registry, router and the running demo workers.
pub struct Fleet {
    pub registry: Arc<Registry>,
    pub router: Arc<Router>,
    pub store: Arc<InMemoryPersistence>,
    runtimes: Vec<Arc<TaskRuntime>>,
}

impl Fleet {
    /// Build the control plane and start the lead, pricing and quotation workers.
    pub async fn start(
        control_plane: &ControlPlaneConfig,
        worker: WorkerConfig,
    ) -> Result<Self, RuntimeError> {
        let registry = Registry::new(EventBus::new(control_plane.event_capacity));
        let router = Arc::new(Router::new(registry.clone(), control_plane.route_timeout()));
        let store = Arc::new(InMemoryPersistence::new());
        let persistence: Arc<dyn Persistence> = store.clone();

        let workers = [
            (
                WorkerDescriptor::new("Lead Analyst", "sales")
                    .with_id("lead-analyst")
                    .with_capability("lead_analysis")
                    .with_specialization("lead_qualification"),
                lead_handlers(persistence.clone()),
            ),
            (
                WorkerDescriptor::new("Pricing Specialist", "pricing")
                    .with_id("pricing-specialist")
                    .with_capability("pricing"),
                pricing_handlers(persistence.clone()),
            ),
            (
                WorkerDescriptor::new("Quotation Writer", "sales")
                    .with_id("quotation-writer")
                    .with_capability("quotation_generation"),
                quotation_handlers(persistence),
            ),
        ];

        let mut runtimes = Vec::with_capacity(workers.len());
        for (descriptor, handlers) in workers {
            let runtime = TaskRuntime::new(descriptor, handlers, registry.clone(), worker.clone());
            runtime.start().await?;
            runtimes.push(runtime);
        }
        info!(workers = runtimes.len(), "Demo fleet started");

        Ok(Self {
            registry,
            router,
            store,
            runtimes,
        })
    }

    pub async fn stop(&self) {
        for runtime in &self.runtimes {
            if let Err(e) = runtime.stop().await {
                warn!(worker_id = %runtime.worker_id(), error = %e, "Failed to stop worker");
            }
        }
    }
}

fn persisted(result: PersistenceResult) -> Result<Value, HandlerError> {
    if result.success {
        Ok(result.data.unwrap_or(Value::Null))
    } else {
        Err(HandlerError::Failed(
            result.error.unwrap_or_else(|| "persistence failure".to_string()),
        ))
    }
}

/// 0-100 score from how complete the lead's buying signals are.
fn lead_score(lead: &Value) -> u64 {
    let mut score = 20;
    if lead.get("budget").and_then(Value::as_f64).is_some_and(|b| b > 0.0) {
        score += 30;
    }
    if lead.get("timeline").and_then(Value::as_str).is_some() {
        score += 25;
    }
    if lead.get("contact_email").and_then(Value::as_str).is_some() {
        score += 25;
    }
    score
}

fn lead_handlers(store: Arc<dyn Persistence>) -> HandlerMap {
    let analyze = handler_fn(move |ctx: ActionContext| {
        let store = store.clone();
        async move {
            let company = ctx.require_str("company")?.to_string();
            let score = lead_score(&ctx.payload);
            let lead = json!({
                "company": company,
                "score": score,
                "qualified": score >= 60,
                "budget": ctx.payload.get("budget"),
            });
            persisted(store.create("lead", lead).await)
        }
    });

    HandlerMap::new().with("analyze_lead", analyze)
}

fn pricing_handlers(store: Arc<dyn Persistence>) -> HandlerMap {
    let calculate = handler_fn(move |ctx: ActionContext| {
        let store = store.clone();
        async move {
            let unit_price = ctx.require_f64("unit_price")?;
            let quantity = ctx.payload.get("quantity").and_then(Value::as_f64).unwrap_or(1.0);
            let discount_pct = ctx
                .payload
                .get("discount_pct")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if !(0.0..=100.0).contains(&discount_pct) {
                return Err(HandlerError::InvalidInput(format!(
                    "discount_pct out of range: {discount_pct}"
                )));
            }

            let subtotal = unit_price * quantity;
            let discount = subtotal * discount_pct / 100.0;
            let pricing = json!({
                "item": ctx.payload.get("item"),
                "quantity": quantity,
                "unit_price": unit_price,
                "subtotal": subtotal,
                "discount": discount,
                "total": subtotal - discount,
            });
            persisted(store.create("pricing", pricing).await)
        }
    });

    // Other pricing actions are acknowledged without a dedicated handler.
    let acknowledge = handler_fn(|ctx: ActionContext| async move {
        Ok::<_, HandlerError>(json!({ "action": ctx.action, "acknowledged": true }))
    });

    HandlerMap::new()
        .with("calculate_pricing", calculate)
        .with_default(acknowledge)
}

fn quotation_handlers(store: Arc<dyn Persistence>) -> HandlerMap {
    let generate = handler_fn(move |ctx: ActionContext| {
        let store = store.clone();
        async move {
            let deps = ctx
                .context
                .get("dependency_results")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let find = |field: &str| deps.values().find_map(|d| d.get(field).cloned());

            let total = find("total").ok_or_else(|| {
                HandlerError::InvalidInput("no pricing among dependency results".to_string())
            })?;
            let quotation = json!({
                "company": find("company").or_else(|| ctx.payload.get("company").cloned()),
                "total": total,
                "currency": ctx.payload.get("currency").cloned().unwrap_or(json!("USD")),
                "valid_days": 30,
            });
            persisted(store.create("quotation", quotation).await)
        }
    });

    HandlerMap::new().with("generate_quotation", generate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::AgentRequest;
    use std::time::Duration;

    #[test]
    fn test_lead_score() {
        assert_eq!(lead_score(&json!({})), 20);
        assert_eq!(
            lead_score(&json!({"budget": 50000, "timeline": "Q3", "contact_email": "a@b.c"})),
            100
        );
        assert_eq!(lead_score(&json!({"budget": 0})), 20);
    }

    #[tokio::test]
    async fn test_fleet_serves_pricing() {
        let fleet = Fleet::start(&ControlPlaneConfig::default(), WorkerConfig::default())
            .await
            .unwrap();
        assert_eq!(fleet.registry.worker_count().await, 3);

        let response = fleet
            .router
            .route(
                "pricing",
                AgentRequest::new(
                    "calculate_pricing",
                    json!({"unit_price": 100.0, "quantity": 3, "discount_pct": 10}),
                ),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(response.worker_id.as_str(), "pricing-specialist");
        assert_eq!(response.data["total"], 270.0);
        assert_eq!(fleet.store.count("pricing").await, 1);

        // apply_discount has no direct handler and falls to the default.
        let response = fleet
            .router
            .route(
                "pricing",
                AgentRequest::new("apply_discount", json!({})),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(response.data["acknowledged"], true);

        fleet.stop().await;
        assert_eq!(fleet.registry.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_quotation_requires_pricing() {
        let fleet = Fleet::start(&ControlPlaneConfig::default(), WorkerConfig::default())
            .await
            .unwrap();

        let err = fleet
            .router
            .route(
                "quotation_generation",
                AgentRequest::new("generate_quotation", json!({})),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no pricing"));
        fleet.stop().await;
    }
}
