//! Worker registry and capability discovery.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use agentrun_core::{
    CoreError, EventKind, PerformanceStats, WorkerDescriptor, WorkerId, WorkerStatus,
};

use crate::events::EventBus;
use crate::handle::Routable;

/// A registered worker.
#[derive(Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,

    /// Display name.
    pub name: String,

    pub role: String,

    pub capabilities: BTreeSet<String>,

    pub specializations: BTreeSet<String>,

    pub status: WorkerStatus,

    /// Bumped on registration, status changes and recorded outcomes only.
    pub last_updated: DateTime<Utc>,

    pub registered_at: DateTime<Utc>,

    pub performance: PerformanceStats,

    /// Registration order, used to break ranking ties.
    seq: u64,

    handle: Arc<dyn Routable>,
}

impl WorkerRecord {
    /// Execution handle for this worker.
    pub fn handle(&self) -> Arc<dyn Routable> {
        Arc::clone(&self.handle)
    }

    /// True if `capability` is a capability or specialization of this worker.
    pub fn offers(&self, capability: &str) -> bool {
        self.capabilities.contains(capability) || self.specializations.contains(capability)
    }

    pub fn success_rate(&self) -> f64 {
        self.performance.success_rate()
    }

    pub fn score(&self) -> f64 {
        self.performance.score()
    }
}

impl fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .field("specializations", &self.specializations)
            .field("status", &self.status)
            .field("last_updated", &self.last_updated)
            .field("performance", &self.performance)
            .finish_non_exhaustive()
    }
}

/// Table of workers and their advertised capabilities.
///
/// `register`, `unregister`, `set_status` and `record_outcome` are the only
/// mutation paths.
pub struct Registry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
    next_seq: AtomicU64,
    events: EventBus,
}

impl Registry {
    /// Create a registry wrapped in Arc.
    pub fn new(events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            events,
        })
    }

    /// Event bus this registry publishes to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a worker. Re-registering an existing id replaces its record
    /// (fresh counters, `active`) but keeps its place in the tie-break order.
    pub async fn register(
        &self,
        descriptor: WorkerDescriptor,
        handle: Arc<dyn Routable>,
    ) -> WorkerId {
        let id = descriptor.id.clone().unwrap_or_else(WorkerId::generate);
        let now = Utc::now();

        let mut workers = self.workers.write().await;
        let seq = match workers.get(&id) {
            Some(existing) => existing.seq,
            None => self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let record = WorkerRecord {
            id: id.clone(),
            name: descriptor.name.clone(),
            role: descriptor.role,
            capabilities: descriptor.capabilities,
            specializations: descriptor.specializations,
            status: WorkerStatus::Active,
            last_updated: now,
            registered_at: now,
            performance: PerformanceStats::default(),
            seq,
            handle,
        };
        let replaced = workers.insert(id.clone(), record).is_some();
        drop(workers);

        info!(
            worker_id = %id,
            name = %descriptor.name,
            replaced,
            "Worker registered"
        );
        self.events.publish(EventKind::WorkerRegistered {
            worker_id: id.clone(),
            name: descriptor.name,
        });

        id
    }

    /// Remove a worker. Returns false if it was not registered.
    pub async fn unregister(&self, worker_id: &WorkerId) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            info!(worker_id = %worker_id, "Worker unregistered");
            self.events.publish(EventKind::WorkerUnregistered {
                worker_id: worker_id.clone(),
            });
        }
        removed
    }

    /// Active workers offering `capability`, best score first.
    ///
    /// Ties keep registration order.
    pub async fn discover(&self, capability: &str) -> Vec<WorkerRecord> {
        let workers = self.workers.read().await;

        let mut candidates: Vec<WorkerRecord> = workers
            .values()
            .filter(|w| w.status.is_selectable() && w.offers(capability))
            .cloned()
            .collect();
        drop(workers);

        candidates.sort_by_key(|w| w.seq);
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));

        debug!(
            capability = %capability,
            candidates = candidates.len(),
            "Discovery complete"
        );
        candidates
    }

    /// Update a worker's status and bump its `last_updated`.
    pub async fn set_status(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
    ) -> Result<(), CoreError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::WorkerNotFound(worker_id.to_string()))?;

        let from = worker.status;
        worker.status = status;
        worker.last_updated = Utc::now();
        drop(workers);

        debug!(worker_id = %worker_id, from = %from, to = %status, "Worker status changed");
        self.events.publish(EventKind::WorkerStatusChanged {
            worker_id: worker_id.clone(),
            from,
            to: status,
        });
        Ok(())
    }

    /// Fold one request outcome into the worker's performance counters.
    pub async fn record_outcome(
        &self,
        worker_id: &WorkerId,
        success: bool,
        response_time_ms: u64,
    ) -> Result<(), CoreError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::WorkerNotFound(worker_id.to_string()))?;

        worker.performance.record(success, response_time_ms as f64);
        worker.last_updated = Utc::now();

        debug!(
            worker_id = %worker_id,
            success,
            response_time_ms,
            success_rate = worker.performance.success_rate(),
            avg_response_time_ms = worker.performance.avg_response_time_ms,
            "Recorded outcome"
        );
        Ok(())
    }

    /// Snapshot of one worker.
    pub async fn get(&self, worker_id: &WorkerId) -> Option<WorkerRecord> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// All workers in registration order.
    pub async fn list(&self) -> Vec<WorkerRecord> {
        let mut all: Vec<WorkerRecord> = self.workers.read().await.values().cloned().collect();
        all.sort_by_key(|w| w.seq);
        all
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Sorted capabilities and specializations of active workers.
    pub async fn capabilities(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let set: BTreeSet<String> = workers
            .values()
            .filter(|w| w.status.is_selectable())
            .flat_map(|w| w.capabilities.iter().chain(w.specializations.iter()).cloned())
            .collect();
        set.into_iter().collect()
    }

    /// Mark inactive every worker that is still `active` and whose
    /// `last_updated` is older than `threshold` at `now`. The check and the
    /// update happen under one write lock, so a worker that just went busy
    /// is left alone. Returns the demoted ids in registration order.
    pub async fn demote_stale(
        &self,
        threshold: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Vec<WorkerId> {
        let mut workers = self.workers.write().await;
        let mut stale: Vec<&mut WorkerRecord> = workers
            .values_mut()
            .filter(|w| w.status == WorkerStatus::Active && now - w.last_updated > threshold)
            .collect();
        stale.sort_by_key(|w| w.seq);

        let updated = Utc::now();
        let demoted: Vec<WorkerId> = stale
            .into_iter()
            .map(|w| {
                w.status = WorkerStatus::Inactive;
                w.last_updated = updated;
                w.id.clone()
            })
            .collect();
        drop(workers);

        for worker_id in &demoted {
            debug!(worker_id = %worker_id, "Worker demoted to inactive");
            self.events.publish(EventKind::WorkerStatusChanged {
                worker_id: worker_id.clone(),
                from: WorkerStatus::Active,
                to: WorkerStatus::Inactive,
            });
        }
        demoted
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, worker_id: &WorkerId, last_updated: DateTime<Utc>) {
        if let Some(worker) = self.workers.write().await.get_mut(worker_id) {
            worker.last_updated = last_updated;
        }
    }
}
