//! Action handlers and the per-worker action → handler map.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use agentrun_core::TaskId;

/// Errors an action handler can return.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),

    #[error("Handler observed cancellation")]
    Cancelled,
}

/// Everything a handler gets for one task.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub task_id: TaskId,
    pub action: String,
    pub payload: Value,
    pub context: Value,
    /// Fires when the task is cancelled. Long-running handlers should watch it.
    pub cancel: CancellationToken,
}

impl ActionContext {
    /// String field from the payload, or `InvalidInput`.
    pub fn require_str(&self, field: &str) -> Result<&str, HandlerError> {
        self.payload
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidInput(format!("missing string field '{field}'")))
    }

    /// Numeric field from the payload, or `InvalidInput`.
    pub fn require_f64(&self, field: &str) -> Result<f64, HandlerError> {
        self.payload
            .get(field)
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::InvalidInput(format!("missing numeric field '{field}'")))
    }
}

/// Executes one named action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: ActionContext) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, ctx: ActionContext) -> Result<Value, HandlerError> {
        (self.0)(ctx).await
    }
}

/// Adapt an async closure into an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Explicit action → handler table, fixed when the runtime is built.
///
/// The default handler serves actions that have no direct entry but whose
/// required capability the worker declares.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    default: Option<Arc<dyn ActionHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add a direct handler.
    pub fn with(mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.insert(action, handler);
        self
    }

    /// Builder method to set the default handler.
    pub fn with_default(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.default = Some(handler);
        self
    }

    pub fn insert(&mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action.into(), handler);
    }

    /// Direct handler for `action`.
    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn default_handler(&self) -> Option<Arc<dyn ActionHandler>> {
        self.default.clone()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Actions with a direct handler, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMap")
            .field("actions", &self.actions())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(payload: Value) -> ActionContext {
        ActionContext {
            task_id: TaskId::new("t-1"),
            action: "calculate_pricing".to_string(),
            payload,
            context: Value::Null,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_handler_fn_adapts_closure() {
        let handler = handler_fn(|ctx: ActionContext| async move {
            let qty = ctx.require_f64("quantity")?;
            Ok::<_, HandlerError>(json!({ "total": qty * 2.0 }))
        });

        let result = handler.handle(ctx(json!({"quantity": 4}))).await.unwrap();
        assert_eq!(result, json!({"total": 8.0}));

        let err = handler.handle(ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[test]
    fn test_handler_map_lookup() {
        let noop = handler_fn(|_ctx: ActionContext| async { Ok(Value::Null) });
        let map = HandlerMap::new()
            .with("calculate_pricing", noop.clone())
            .with("apply_discount", noop);

        assert!(map.contains("calculate_pricing"));
        assert!(map.get("draft_email").is_none());
        assert!(map.default_handler().is_none());
        assert_eq!(map.actions(), vec!["apply_discount", "calculate_pricing"]);
    }
}
