//! AgentRun Control Plane Library
//!
//! This crate provides the in-process control plane for AgentRun:
//! the worker registry, performance-aware request routing, the typed
//! event bus and the periodic health sweep.

pub mod config;
pub mod events;
pub mod handle;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;

pub use config::Config;
pub use events::EventBus;
pub use handle::{HealthCheckable, HealthReport, Registrable, Routable};
pub use health::HealthMonitor;
pub use metrics::collect_metrics;
pub use registry::{Registry, WorkerRecord};
pub use router::{BroadcastResult, RouteResponse, Router, RouterError};
