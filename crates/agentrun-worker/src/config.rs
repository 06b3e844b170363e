//! Worker runtime configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What `queue_task` does when the backlog is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Refuse the new task with `BacklogFull`.
    #[default]
    RejectNew,
    /// Evict the oldest queued task and accept the new one.
    DropOldest,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectNew => f.write_str("reject_new"),
            Self::DropOldest => f.write_str("drop_oldest"),
        }
    }
}

impl FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "reject_new" => Ok(Self::RejectNew),
            "drop_oldest" => Ok(Self::DropOldest),
            other => Err(format!("unknown backpressure policy: {other}")),
        }
    }
}

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of pull-workers, and so the ceiling on concurrently active tasks.
    pub max_concurrent_tasks: usize,

    /// Maximum number of queued (not yet active) tasks.
    pub max_backlog: usize,

    pub backpressure: BackpressurePolicy,

    /// How long `stop()` waits for active tasks before cancelling them (seconds).
    pub stop_timeout_secs: u64,

    /// How often `stop()` re-checks the active set (milliseconds).
    pub stop_poll_interval_ms: u64,

    /// How long `stop()` lets a pull-worker wind down after its task is
    /// cancelled before aborting it (milliseconds).
    pub stop_grace_ms: u64,
}

impl Config {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_backlog: 100,
            backpressure: BackpressurePolicy::default(),
            stop_timeout_secs: 30,
            stop_poll_interval_ms: 100,
            stop_grace_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("reject_new".parse(), Ok(BackpressurePolicy::RejectNew));
        assert_eq!("drop-oldest".parse(), Ok(BackpressurePolicy::DropOldest));
        assert!("lifo".parse::<BackpressurePolicy>().is_err());
    }
}
