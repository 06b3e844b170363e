//! Prometheus metrics collection and formatting.
//!
//! This module renders registry state in Prometheus text exposition format.

use std::fmt::Write;

use agentrun_core::WorkerStatus;

use crate::registry::Registry;

/// Collect all metrics from the registry and format as Prometheus text.
pub async fn collect_metrics(registry: &Registry) -> String {
    let mut output = String::new();

    collect_status_metrics(registry, &mut output).await;
    collect_performance_metrics(registry, &mut output).await;

    output
}

/// Registered workers by status.
async fn collect_status_metrics(registry: &Registry, output: &mut String) {
    let workers = registry.list().await;

    writeln!(
        output,
        "# HELP agentrun_workers_registered Number of registered workers by status"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_workers_registered gauge").ok();
    for status in WorkerStatus::all() {
        let count = workers.iter().filter(|w| w.status == status).count();
        writeln!(
            output,
            "agentrun_workers_registered{{status=\"{}\"}} {count}",
            status.as_str()
        )
        .ok();
    }
}

/// Per-worker request counters, mean latency and success rate.
async fn collect_performance_metrics(registry: &Registry, output: &mut String) {
    let workers = registry.list().await;

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_worker_requests_total Routed requests per worker by outcome"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_worker_requests_total counter").ok();
    for worker in &workers {
        let perf = &worker.performance;
        writeln!(
            output,
            "agentrun_worker_requests_total{{worker_id=\"{}\",outcome=\"success\"}} {}",
            worker.id, perf.success_count
        )
        .ok();
        writeln!(
            output,
            "agentrun_worker_requests_total{{worker_id=\"{}\",outcome=\"failure\"}} {}",
            worker.id, perf.failure_count
        )
        .ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_worker_avg_response_time_ms Mean response time per worker"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_worker_avg_response_time_ms gauge").ok();
    for worker in &workers {
        writeln!(
            output,
            "agentrun_worker_avg_response_time_ms{{worker_id=\"{}\"}} {}",
            worker.id, worker.performance.avg_response_time_ms
        )
        .ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_worker_success_rate Success percentage per worker"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_worker_success_rate gauge").ok();
    for worker in &workers {
        writeln!(
            output,
            "agentrun_worker_success_rate{{worker_id=\"{}\"}} {}",
            worker.id,
            worker.success_rate()
        )
        .ok();
    }
}
