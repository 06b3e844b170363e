//! Control plane configuration.

use std::time::Duration;

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default timeout applied to routed requests (milliseconds).
    pub route_timeout_ms: u64,

    /// Interval between health sweeps (seconds).
    pub health_check_interval_secs: u64,

    /// Time since the last status update before an active worker is stale (seconds).
    pub staleness_threshold_secs: u64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Config {
    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            route_timeout_ms: 30_000,
            health_check_interval_secs: 60,
            staleness_threshold_secs: 300,
            event_capacity: 256,
        }
    }
}
