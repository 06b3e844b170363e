//! Boundary to the CRM persistence layer used by action handlers.
//!
//! The runtime treats every call as a black box returning a
//! [`PersistenceResult`]. [`InMemoryPersistence`] backs the demo workers.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Envelope returned by every persistence call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistenceResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// CRUD-style access to CRM entities (`lead`, `deal`, `quotation`, ...).
///
/// `get`, `update` and `delete` locate the record by the `id` field of `data`.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create(&self, entity: &str, data: Value) -> PersistenceResult;
    async fn get(&self, entity: &str, data: Value) -> PersistenceResult;
    async fn update(&self, entity: &str, data: Value) -> PersistenceResult;
    async fn delete(&self, entity: &str, data: Value) -> PersistenceResult;
}

/// Process-local entity store.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    entities: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `entity`.
    pub async fn count(&self, entity: &str) -> usize {
        self.entities
            .read()
            .await
            .get(entity)
            .map_or(0, BTreeMap::len)
    }
}

fn record_id(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn create(&self, entity: &str, mut data: Value) -> PersistenceResult {
        let id = match record_id(&data) {
            Some(id) => id,
            None => {
                let Value::Object(fields) = &mut data else {
                    return PersistenceResult::err(format!("{entity} must be a JSON object"));
                };
                if fields.contains_key("id") {
                    return PersistenceResult::err("id must be a string or number");
                }
                let id = uuid::Uuid::new_v4().to_string();
                fields.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut entities = self.entities.write().await;
        let table = entities.entry(entity.to_string()).or_default();
        if table.contains_key(&id) {
            return PersistenceResult::err(format!("{entity} {id} already exists"));
        }
        table.insert(id.clone(), data.clone());
        debug!(entity = %entity, id = %id, "Created record");
        PersistenceResult::ok(data)
    }

    async fn get(&self, entity: &str, data: Value) -> PersistenceResult {
        let Some(id) = record_id(&data) else {
            return PersistenceResult::err("missing id");
        };
        match self
            .entities
            .read()
            .await
            .get(entity)
            .and_then(|table| table.get(&id))
        {
            Some(record) => PersistenceResult::ok(record.clone()),
            None => PersistenceResult::err(format!("{entity} {id} not found")),
        }
    }

    async fn update(&self, entity: &str, data: Value) -> PersistenceResult {
        let Some(id) = record_id(&data) else {
            return PersistenceResult::err("missing id");
        };
        let Value::Object(changes) = data else {
            return PersistenceResult::err(format!("{entity} must be a JSON object"));
        };

        let mut entities = self.entities.write().await;
        let Some(Value::Object(existing)) = entities
            .get_mut(entity)
            .and_then(|table| table.get_mut(&id))
        else {
            return PersistenceResult::err(format!("{entity} {id} not found"));
        };
        for (key, value) in changes {
            existing.insert(key, value);
        }
        debug!(entity = %entity, id = %id, "Updated record");
        PersistenceResult::ok(Value::Object(existing.clone()))
    }

    async fn delete(&self, entity: &str, data: Value) -> PersistenceResult {
        let Some(id) = record_id(&data) else {
            return PersistenceResult::err("missing id");
        };
        match self
            .entities
            .write()
            .await
            .get_mut(entity)
            .and_then(|table| table.remove(&id))
        {
            Some(record) => PersistenceResult::ok(record),
            None => PersistenceResult::err(format!("{entity} {id} not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_cycle() {
        let store = InMemoryPersistence::new();

        let created = store
            .create("lead", json!({"company": "Acme Rentals", "score": 40}))
            .await;
        assert!(created.success);
        let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

        let updated = store.update("lead", json!({"id": id, "score": 85})).await;
        assert_eq!(updated.data.unwrap()["score"], json!(85));

        let fetched = store.get("lead", json!({"id": id})).await;
        assert_eq!(fetched.data.unwrap()["company"], json!("Acme Rentals"));

        assert!(store.delete("lead", json!({"id": id})).await.success);
        assert_eq!(store.count("lead").await, 0);
    }

    #[tokio::test]
    async fn test_errors_are_envelopes() {
        let store = InMemoryPersistence::new();

        let missing = store.get("deal", json!({"id": "nope"})).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));

        assert!(!store.create("deal", json!("not an object")).await.success);
        assert!(store.create("deal", json!({"id": 7})).await.success);
        assert!(!store.create("deal", json!({"id": 7})).await.success);
    }
}
