//! AgentRun Worker Library
//!
//! The task runtime a worker ("agent") runs on: a bounded pull-worker pool
//! over a bounded backlog, an explicit action → handler map, lifecycle
//! management and local metrics. A started runtime registers itself with the
//! control plane registry and is routed to through [`Routable`].
//!
//! [`Routable`]: agentrun_control_plane::Routable

pub mod config;
pub mod handler;
pub mod persistence;
pub mod runtime;

pub use config::{BackpressurePolicy, Config};
pub use handler::{handler_fn, ActionContext, ActionHandler, HandlerError, HandlerMap};
pub use persistence::{InMemoryPersistence, Persistence, PersistenceResult};
pub use runtime::{RuntimeError, TaskHandle, TaskRuntime};
