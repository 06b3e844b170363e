//! Periodic staleness sweep over the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentrun_core::{LogLevel, WorkerId};

use crate::config::Config;
use crate::registry::Registry;

/// Marks active workers inactive once they stop reporting.
pub struct HealthMonitor {
    registry: Arc<Registry>,
    interval: Duration,
    threshold: chrono::Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, config: &Config) -> Self {
        Self {
            registry,
            interval: config.health_check_interval(),
            threshold: config.staleness_threshold(),
        }
    }

    /// Run one sweep against the current time.
    pub async fn sweep(&self) -> Vec<WorkerId> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as if the clock read `now`. Returns the workers marked inactive.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<WorkerId> {
        let marked = self.registry.demote_stale(self.threshold, now).await;

        for worker_id in &marked {
            warn!(worker_id = %worker_id, "Worker stale, marked inactive");
            self.registry.events().log(
                LogLevel::Warn,
                "health",
                format!("worker {worker_id} marked inactive after missing status updates"),
            );
        }

        marked
    }

    /// Sweep every interval until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                threshold_secs = self.threshold.num_seconds(),
                "Health monitor started"
            );
            let mut timer = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Health monitor stopped");
                        break;
                    }
                    _ = timer.tick() => {
                        let marked = self.sweep().await;
                        if !marked.is_empty() {
                            info!(count = marked.len(), "Health sweep marked workers inactive");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{descriptor, EchoHandle};
    use crate::EventBus;
    use agentrun_core::{EventKind, WorkerStatus};

    #[tokio::test]
    async fn test_sweep_marks_only_stale_active_workers() {
        let bus = EventBus::default();
        let registry = Registry::new(bus.clone());
        let fresh = registry.register(descriptor("fresh", "pricing"), Arc::new(EchoHandle)).await;
        let stale = registry.register(descriptor("stale", "pricing"), Arc::new(EchoHandle)).await;
        let busy = registry.register(descriptor("busy", "pricing"), Arc::new(EchoHandle)).await;
        registry.set_status(&busy, WorkerStatus::Busy).await.unwrap();

        let now = Utc::now();
        registry.backdate(&stale, now - chrono::Duration::seconds(301)).await;
        registry.backdate(&busy, now - chrono::Duration::seconds(900)).await;
        let mut rx = bus.subscribe();

        let monitor = HealthMonitor::new(registry.clone(), &Config::default());
        let marked = monitor.sweep_at(now).await;

        assert_eq!(marked, vec![stale.clone()]);
        assert_eq!(registry.get(&stale).await.unwrap().status, WorkerStatus::Inactive);
        assert_eq!(registry.get(&fresh).await.unwrap().status, WorkerStatus::Active);
        assert_eq!(registry.get(&busy).await.unwrap().status, WorkerStatus::Busy);

        let mut saw_log = false;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::Log { level, source, .. } = event.kind {
                saw_log |= level == LogLevel::Warn && source == "health";
            }
        }
        assert!(saw_log);
    }

    #[tokio::test]
    async fn test_sweep_respects_threshold_boundary() {
        let registry = Registry::new(EventBus::default());
        let id = registry.register(descriptor("edge", "pricing"), Arc::new(EchoHandle)).await;
        let now = Utc::now();
        registry.backdate(&id, now - chrono::Duration::seconds(300)).await;

        let monitor = HealthMonitor::new(registry.clone(), &Config::default());
        assert!(monitor.sweep_at(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_monitor_stops_on_shutdown() {
        let registry = Registry::new(EventBus::default());
        let config = Config {
            health_check_interval_secs: 1,
            ..Config::default()
        };
        let shutdown = CancellationToken::new();
        let handle = HealthMonitor::new(registry, &config).spawn(shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_demotes_after_interval() {
        let bus = EventBus::default();
        let registry = Registry::new(bus.clone());
        let id = registry.register(descriptor("quiet", "pricing"), Arc::new(EchoHandle)).await;
        registry
            .backdate(&id, Utc::now() - chrono::Duration::seconds(301))
            .await;

        let config = Config {
            health_check_interval_secs: 60,
            ..Config::default()
        };
        let mut rx = bus.subscribe();
        let shutdown = CancellationToken::new();
        let handle = HealthMonitor::new(registry.clone(), &config).spawn(shutdown.clone());

        // The paused clock jumps to the first interval tick while we wait.
        let started = tokio::time::Instant::now();
        let demoted = tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let EventKind::WorkerStatusChanged { worker_id, to, .. } = event.kind {
                            break (worker_id, to);
                        }
                    }
                    Err(e) => panic!("event bus closed: {e}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(demoted, (id.clone(), WorkerStatus::Inactive));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(registry.get(&id).await.unwrap().status, WorkerStatus::Inactive);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
