//! AgentRun CLI - runs the multi-agent CRM core in-process.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use agentrun_control_plane::{collect_metrics, Config as ControlPlaneConfig, HealthMonitor};
use agentrun_core::{AgentRequest, OrchestrationResponse, WorkflowReport};
use agentrun_orchestrator::{
    Config as OrchestratorConfig, ExecutionMode, HttpReasoningClient, Orchestrator,
    ReasoningClient, ScriptedReasoningClient,
};
use agentrun_worker::{BackpressurePolicy, Config as WorkerConfig};

mod fleet;
mod scenario;

use fleet::Fleet;

/// AgentRun CLI - multi-agent CRM orchestration
#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "Run the AgentRun orchestration core in-process", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(flatten)]
    fleet: FleetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FleetArgs {
    /// Concurrent tasks per worker
    #[arg(long, default_value_t = 5, global = true)]
    max_concurrent_tasks: usize,

    /// Queued tasks per worker before backpressure applies
    #[arg(long, default_value_t = 100, global = true)]
    max_backlog: usize,

    /// What a full backlog does with new tasks (reject-new, drop-oldest)
    #[arg(long, default_value = "reject-new", global = true)]
    backpressure: BackpressurePolicy,

    /// Default route timeout in milliseconds
    #[arg(long, default_value_t = 30_000, global = true)]
    route_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute the sample quotation request
    Demo {
        /// OpenAI-compatible reasoning service; scripted replies are used when absent
        #[arg(long)]
        reasoning_url: Option<String>,

        /// Model name sent to the reasoning service
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,

        /// Bearer token for the reasoning service
        #[arg(long)]
        api_key: Option<String>,

        /// Workflow execution mode (dag, single-pass)
        #[arg(long, default_value = "dag")]
        execution_mode: ExecutionMode,

        /// Steps in flight at once
        #[arg(long, default_value_t = 4)]
        max_parallel_steps: usize,

        /// Per-step timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        step_timeout_ms: u64,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Route a single request to the best worker for a capability
    Route {
        /// Capability to route to
        capability: String,

        /// Action to run
        action: String,

        /// Payload JSON
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },

    /// List the demo workers
    Workers,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level: Level = cli.log_level.parse()?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let control_plane = ControlPlaneConfig {
        route_timeout_ms: cli.fleet.route_timeout_ms,
        ..ControlPlaneConfig::default()
    };
    let worker = WorkerConfig {
        max_concurrent_tasks: cli.fleet.max_concurrent_tasks,
        max_backlog: cli.fleet.max_backlog,
        backpressure: cli.fleet.backpressure,
        ..WorkerConfig::default()
    };

    let fleet = Fleet::start(&control_plane, worker).await?;

    match cli.command {
        Commands::Demo {
            reasoning_url,
            model,
            api_key,
            execution_mode,
            max_parallel_steps,
            step_timeout_ms,
            json,
            metrics,
        } => {
            let config = OrchestratorConfig {
                step_timeout_ms,
                execution_mode,
                max_parallel_steps,
                model,
                ..OrchestratorConfig::default()
            };
            let reasoning: Arc<dyn ReasoningClient> = match reasoning_url {
                Some(url) => {
                    info!(url = %url, model = %config.model, "Using reasoning service");
                    let client = HttpReasoningClient::new(&url, config.model.clone());
                    match api_key {
                        Some(key) => Arc::new(client.with_api_key(key)),
                        None => Arc::new(client),
                    }
                }
                None => Arc::new(ScriptedReasoningClient::new(scenario::scripted_replies())),
            };

            run_demo(&fleet, &control_plane, reasoning, config, json).await?;
            if metrics {
                print!("{}", collect_metrics(&fleet.registry).await);
            }
        }
        Commands::Route {
            capability,
            action,
            payload,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let response = fleet
                .router
                .route(
                    &capability,
                    AgentRequest::new(action, payload),
                    control_plane.route_timeout(),
                )
                .await?;
            println!(
                "Handled by {} in {}ms:",
                response.worker_id, response.elapsed_ms
            );
            println!("{}", serde_json::to_string_pretty(&response.data)?);
        }
        Commands::Workers => {
            let workers = fleet.registry.list().await;
            println!("Workers ({}):", workers.len());
            println!(
                "{:<20}  {:<20}  {:<8}  {}",
                "ID", "NAME", "STATUS", "CAPABILITIES"
            );
            println!("{}", "-".repeat(80));
            for w in workers {
                let offers: Vec<&str> = w
                    .capabilities
                    .iter()
                    .chain(w.specializations.iter())
                    .map(String::as_str)
                    .collect();
                println!(
                    "{:<20}  {:<20}  {:<8}  {}",
                    w.id.as_str(),
                    w.name,
                    w.status.as_str(),
                    offers.join(", ")
                );
            }
        }
    }

    fleet.stop().await;
    Ok(())
}

async fn run_demo(
    fleet: &Fleet,
    control_plane: &ControlPlaneConfig,
    reasoning: Arc<dyn ReasoningClient>,
    config: OrchestratorConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();

    let health = HealthMonitor::new(fleet.registry.clone(), control_plane).spawn(shutdown.clone());

    let mut events = fleet.registry.events().subscribe();
    let event_shutdown = shutdown.clone();
    let event_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = event_shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => debug!(event = event.name(), "Event"),
                    Err(RecvError::Lagged(missed)) => debug!(missed, "Event log lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let orchestrator = Orchestrator::new(fleet.router.clone(), reasoning, config);
    let response = orchestrator.handle_request(scenario::demo_request()).await;

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), health).await;
    let _ = event_log.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
        println!(
            "Stored: {} leads, {} pricings, {} quotations",
            fleet.store.count("lead").await,
            fleet.store.count("pricing").await,
            fleet.store.count("quotation").await
        );
    }
    Ok(())
}

fn print_response(response: &OrchestrationResponse) {
    println!(
        "Request {}",
        if response.success { "succeeded" } else { "failed" }
    );
    if let Some(error) = &response.error {
        println!("  Error: {}", error);
    }
    if let Some(report) = &response.workflow {
        print_report(report);
    }

    println!();
    println!("Summary: {}", response.follow_up.summary);
    for action in &response.follow_up.recommended_actions {
        println!(
            "  [{:<6}] {:<20} {}",
            action.priority.to_string(),
            action.action,
            action.description
        );
    }
}

fn print_report(report: &WorkflowReport) {
    println!(
        "Workflow {} ({} of {} steps completed{})",
        report.workflow_id,
        report.completed_steps.len(),
        report.total_steps,
        if report.fallback { ", fallback plan" } else { "" }
    );
    println!("{:<12}  {:<9}  {:<20}  {}", "STEP", "STATUS", "WORKER", "ACTION");
    println!("{}", "-".repeat(70));
    for (step_id, outcome) in &report.results {
        let worker = outcome
            .worker
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if outcome.success { "completed" } else { "failed" };
        println!(
            "{:<12}  {:<9}  {:<20}  {}",
            step_id.as_str(),
            status,
            worker,
            outcome.action
        );
        if let Some(error) = &outcome.error {
            println!("              {}", error);
        }
    }
    for step_id in &report.skipped_steps {
        println!("{:<12}  {:<9}  {:<20}  -", step_id.as_str(), "skipped", "-");
    }
}
