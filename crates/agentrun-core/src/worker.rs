//! Worker descriptors and rolling performance statistics.

use crate::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a worker advertises when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Requested identifier. The registry generates one when absent.
    pub id: Option<WorkerId>,

    /// Human-readable display name.
    pub name: String,

    /// Business role (e.g. "sales", "pricing").
    pub role: String,

    /// Named competencies used for discovery.
    pub capabilities: BTreeSet<String>,

    /// Narrower competencies, also matched by discovery.
    pub specializations: BTreeSet<String>,
}

impl WorkerDescriptor {
    /// Create a new descriptor with no capabilities.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            role: role.into(),
            capabilities: BTreeSet::new(),
            specializations: BTreeSet::new(),
        }
    }

    /// Builder method to request a specific id.
    pub fn with_id(mut self, id: impl Into<WorkerId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder method to add a capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Builder method to add a specialization.
    pub fn with_specialization(mut self, specialization: impl Into<String>) -> Self {
        self.specializations.insert(specialization.into());
        self
    }

    /// True if `capability` is a declared capability or specialization.
    pub fn offers(&self, capability: &str) -> bool {
        self.capabilities.contains(capability) || self.specializations.contains(capability)
    }
}

/// Rolling performance counters kept by the registry.
///
/// Integer counters are the source of truth; the success rate is derived on
/// read so repeated updates never accumulate rounding drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_count: u64,
    pub avg_response_time_ms: f64,
}

impl PerformanceStats {
    /// Fold one outcome into the counters and the incremental mean.
    pub fn record(&mut self, success: bool, response_time_ms: f64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_count += 1;
        self.avg_response_time_ms = incremental_mean(
            self.avg_response_time_ms,
            self.total_count,
            response_time_ms,
        );
    }

    /// Success percentage in `[0, 100]`; zero before any outcome.
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_count as f64 * 100.0
    }

    /// Ranking score: `success_rate - avg_response_time_ms / 1000`.
    pub fn score(&self) -> f64 {
        self.success_rate() - self.avg_response_time_ms / 1000.0
    }
}

/// `(old * (n - 1) + new) / n`, with `n` the count including `new`.
pub fn incremental_mean(old: f64, n: u64, new: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    (old * (n - 1.0) + new) / n
}
