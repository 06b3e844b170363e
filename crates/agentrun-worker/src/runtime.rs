//! Per-worker task runtime.
//!
//! A runtime owns a bounded backlog and exactly `max_concurrent_tasks`
//! pull-workers. Each pull-worker moves one task into the active set, runs
//! its handler, resolves the caller's handle and only then pulls the next
//! task, so the active set can never exceed the configured ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentrun_control_plane::{
    EventBus, HealthCheckable, HealthReport, Registrable, Registry, Routable,
};
use agentrun_core::actions::required_capability;
use agentrun_core::{
    AgentRequest, EventKind, LogLevel, RuntimeStatus, TaskError, TaskErrorKind, TaskId,
    TaskOutcome, TaskRecord, WorkerDescriptor, WorkerId, WorkerMetrics,
};

use crate::config::{BackpressurePolicy, Config};
use crate::handler::{ActionContext, ActionHandler, HandlerError, HandlerMap};

/// Errors returned by runtime operations that can refuse work.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("Backlog full ({capacity} tasks queued)")]
    BacklogFull { capacity: usize },

    #[error("Runtime not ready (status: {0})")]
    NotReady(RuntimeStatus),

    #[error("Invalid runtime transition from {from} to {to}")]
    InvalidTransition {
        from: RuntimeStatus,
        to: RuntimeStatus,
    },
}

impl RuntimeError {
    fn kind(&self) -> TaskErrorKind {
        match self {
            Self::BacklogFull { .. } => TaskErrorKind::BacklogFull,
            Self::NotReady(_) | Self::InvalidTransition { .. } => TaskErrorKind::RuntimeNotReady,
        }
    }
}

/// Caller's side of a queued task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Request cancellation. A queued task is never started; a running one
    /// has its handler dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task's result envelope.
    pub async fn wait(self) -> TaskOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => TaskOutcome::failure(
                self.task_id,
                TaskError::new(TaskErrorKind::Cancelled, "task abandoned before completion"),
                0,
            ),
        }
    }
}

struct QueuedTask {
    record: TaskRecord,
    cancel: CancellationToken,
    responder: oneshot::Sender<TaskOutcome>,
}

impl QueuedTask {
    fn reject(self, kind: TaskErrorKind, message: &str) {
        let outcome = TaskOutcome::failure(self.record.id, TaskError::new(kind, message), 0);
        let _ = self.responder.send(outcome);
    }
}

#[derive(Clone)]
struct ActiveTask {
    action: String,
    cancel: CancellationToken,
}

/// Lock a std mutex, ignoring poisoning. Critical sections never panic midway.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Task runtime for one worker.
pub struct TaskRuntime {
    worker_id: WorkerId,
    descriptor: WorkerDescriptor,
    handlers: HandlerMap,
    registry: Arc<Registry>,
    events: EventBus,
    config: Config,

    status: Mutex<RuntimeStatus>,
    backlog: Mutex<VecDeque<QueuedTask>>,
    active: Mutex<HashMap<TaskId, ActiveTask>>,
    metrics: Mutex<WorkerMetrics>,
    notify: Notify,
    shutdown: Mutex<CancellationToken>,
    pull_workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRuntime {
    /// Build a runtime. A descriptor without an id gets a generated one.
    pub fn new(
        mut descriptor: WorkerDescriptor,
        handlers: HandlerMap,
        registry: Arc<Registry>,
        config: Config,
    ) -> Arc<Self> {
        let worker_id = descriptor
            .id
            .get_or_insert_with(WorkerId::generate)
            .clone();
        let events = registry.events().clone();

        Arc::new(Self {
            worker_id,
            descriptor,
            handlers,
            registry,
            events,
            config,
            status: Mutex::new(RuntimeStatus::Initialized),
            backlog: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            metrics: Mutex::new(WorkerMetrics::default()),
            notify: Notify::new(),
            shutdown: Mutex::new(CancellationToken::new()),
            pull_workers: Mutex::new(Vec::new()),
        })
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> RuntimeStatus {
        *lock(&self.status)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn backlog_len(&self) -> usize {
        lock(&self.backlog).len()
    }

    /// Snapshot of the local metrics.
    pub fn metrics(&self) -> WorkerMetrics {
        *lock(&self.metrics)
    }

    /// True if a direct handler exists, or the action's required capability
    /// is declared by this worker and a default handler is installed.
    pub fn supports_action(&self, action: &str) -> bool {
        self.resolve_handler(action).is_some()
    }

    fn resolve_handler(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        if let Some(handler) = self.handlers.get(action) {
            return Some(handler);
        }
        let capability = required_capability(action)?;
        if self.descriptor.offers(capability) {
            self.handlers.default_handler()
        } else {
            None
        }
    }

    /// Queue a task and return immediately with its handle.
    pub fn queue_task(
        &self,
        action: impl Into<String>,
        payload: Value,
        context: Value,
    ) -> Result<TaskHandle, RuntimeError> {
        self.enqueue(TaskRecord::new(action, payload, context), CancellationToken::new())
    }

    fn enqueue(
        &self,
        record: TaskRecord,
        cancel: CancellationToken,
    ) -> Result<TaskHandle, RuntimeError> {
        let (responder, rx) = oneshot::channel();
        let handle = TaskHandle {
            task_id: record.id.clone(),
            cancel: cancel.clone(),
            rx,
        };

        let evicted = {
            let mut backlog = lock(&self.backlog);
            // Checked under the backlog lock so `stop()` cannot miss a late arrival.
            let status = self.status();
            if !status.accepts_tasks() {
                return Err(RuntimeError::NotReady(status));
            }

            let evicted = if backlog.len() >= self.config.max_backlog {
                let capacity = self.config.max_backlog;
                match self.config.backpressure {
                    BackpressurePolicy::RejectNew => {
                        return Err(RuntimeError::BacklogFull { capacity })
                    }
                    BackpressurePolicy::DropOldest => match backlog.pop_front() {
                        Some(oldest) => Some(oldest),
                        None => return Err(RuntimeError::BacklogFull { capacity }),
                    },
                }
            } else {
                None
            };

            debug!(
                worker_id = %self.worker_id,
                task_id = %record.id,
                action = %record.action,
                backlog = backlog.len() + 1,
                "Task queued"
            );
            backlog.push_back(QueuedTask {
                record,
                cancel,
                responder,
            });
            evicted
        };
        self.notify.notify_one();

        if let Some(oldest) = evicted {
            warn!(
                worker_id = %self.worker_id,
                task_id = %oldest.record.id,
                "Backlog full, dropping oldest task"
            );
            oldest.reject(TaskErrorKind::Dropped, "evicted from a full backlog");
        }

        Ok(handle)
    }

    /// Queue a task and wait for its envelope. Never fails: refusals become
    /// failure envelopes.
    pub async fn execute(
        &self,
        action: impl Into<String>,
        payload: Value,
        context: Value,
    ) -> TaskOutcome {
        self.submit(
            TaskRecord::new(action, payload, context),
            CancellationToken::new(),
        )
        .await
    }

    async fn submit(&self, record: TaskRecord, cancel: CancellationToken) -> TaskOutcome {
        let task_id = record.id.clone();
        match self.enqueue(record, cancel) {
            Ok(handle) => handle.wait().await,
            Err(e) => TaskOutcome::failure(task_id, TaskError::new(e.kind(), e.to_string()), 0),
        }
    }

    /// `initialized | stopped → starting → ready`: spawn the pull-workers and
    /// register with the registry.
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        {
            let mut status = lock(&self.status);
            if !status.can_start() {
                return Err(RuntimeError::InvalidTransition {
                    from: *status,
                    to: RuntimeStatus::Starting,
                });
            }
            *status = RuntimeStatus::Starting;
        }

        let shutdown = CancellationToken::new();
        *lock(&self.shutdown) = shutdown.clone();

        let handles: Vec<JoinHandle<()>> = (0..self.config.max_concurrent_tasks)
            .map(|slot| tokio::spawn(Arc::clone(self).pull_loop(slot, shutdown.clone())))
            .collect();
        *lock(&self.pull_workers) = handles;

        let routable: Arc<dyn Routable> = Arc::clone(self) as Arc<dyn Routable>;
        self.registry.register(self.descriptor(), routable).await;

        self.transition(RuntimeStatus::Ready);
        info!(
            worker_id = %self.worker_id,
            name = %self.descriptor.name,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            max_backlog = self.config.max_backlog,
            "Task runtime ready"
        );
        Ok(())
    }

    /// `ready → stopping → stopped`.
    ///
    /// Stops taking work, waits for the active set to drain (polling up to
    /// the stop timeout), cancels what is still running, fails the remaining
    /// backlog with `runtime_not_ready` and unregisters.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        {
            let mut status = lock(&self.status);
            if *status != RuntimeStatus::Ready {
                return Err(RuntimeError::InvalidTransition {
                    from: *status,
                    to: RuntimeStatus::Stopping,
                });
            }
            *status = RuntimeStatus::Stopping;
        }
        info!(worker_id = %self.worker_id, "Stopping task runtime");
        self.events.log(
            LogLevel::Info,
            self.worker_id.as_str(),
            format!("runtime {} stopping", self.worker_id),
        );

        // Pull-workers finish their current task and exit.
        lock(&self.shutdown).cancel();

        let deadline = Instant::now() + self.config.stop_timeout();
        while self.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(self.config.stop_poll_interval()).await;
        }

        let still_running: Vec<(TaskId, ActiveTask)> = lock(&self.active)
            .iter()
            .map(|(id, task)| (id.clone(), task.clone()))
            .collect();
        if !still_running.is_empty() {
            warn!(
                worker_id = %self.worker_id,
                count = still_running.len(),
                "Stop timeout reached, cancelling active tasks"
            );
            for (task_id, task) in &still_running {
                debug!(task_id = %task_id, action = %task.action, "Cancelling task");
                task.cancel.cancel();
            }
        }

        // Cancelled tasks still resolve through `run_task`, so their outcome
        // reaches the caller, the metrics and the event bus.
        let pull_workers: Vec<JoinHandle<()>> = lock(&self.pull_workers).drain(..).collect();
        for mut handle in pull_workers {
            if tokio::time::timeout(self.config.stop_grace(), &mut handle)
                .await
                .is_err()
            {
                warn!(worker_id = %self.worker_id, "Pull-worker did not exit, aborting");
                handle.abort();
            }
        }

        let leftover: Vec<QueuedTask> = lock(&self.backlog).drain(..).collect();
        if !leftover.is_empty() {
            info!(
                worker_id = %self.worker_id,
                count = leftover.len(),
                "Failing queued tasks on stop"
            );
        }
        for task in leftover {
            task.reject(TaskErrorKind::RuntimeNotReady, "runtime stopped");
        }

        self.registry.unregister(&self.worker_id).await;
        self.transition(RuntimeStatus::Stopped);
        info!(worker_id = %self.worker_id, "Task runtime stopped");
        Ok(())
    }

    /// `stop()` then `start()`.
    pub async fn restart(self: &Arc<Self>) -> Result<(), RuntimeError> {
        self.stop().await?;
        self.start().await
    }

    fn transition(&self, to: RuntimeStatus) {
        let from = std::mem::replace(&mut *lock(&self.status), to);
        debug!(worker_id = %self.worker_id, from = %from, to = %to, "Runtime status changed");
        self.events.log(
            LogLevel::Debug,
            self.worker_id.as_str(),
            format!("runtime {from} -> {to}"),
        );
    }

    async fn pull_loop(self: Arc<Self>, slot: usize, shutdown: CancellationToken) {
        debug!(worker_id = %self.worker_id, slot, "Pull-worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let next = lock(&self.backlog).pop_front();
            let task = match next {
                Some(task) => task,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.notify.notified() => {}
                    }
                    continue;
                }
            };

            let QueuedTask {
                record,
                cancel,
                responder,
            } = task;

            lock(&self.active).insert(
                record.id.clone(),
                ActiveTask {
                    action: record.action.clone(),
                    cancel: cancel.clone(),
                },
            );

            let outcome = self.run_task(&record, cancel).await;

            lock(&self.active).remove(&record.id);
            let _ = responder.send(outcome);
        }

        debug!(worker_id = %self.worker_id, slot, "Pull-worker exited");
    }

    async fn run_task(&self, record: &TaskRecord, cancel: CancellationToken) -> TaskOutcome {
        let started = Instant::now();

        let result = match self.resolve_handler(&record.action) {
            None => Err(TaskError::new(
                TaskErrorKind::UnsupportedAction,
                format!(
                    "worker {} does not support action '{}'",
                    self.worker_id, record.action
                ),
            )),
            Some(_) if cancel.is_cancelled() => Err(TaskError::new(
                TaskErrorKind::Cancelled,
                "cancelled before start",
            )),
            Some(handler) => {
                let ctx = ActionContext {
                    task_id: record.id.clone(),
                    action: record.action.clone(),
                    payload: record.payload.clone(),
                    context: record.context.clone(),
                    cancel: cancel.clone(),
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TaskError::new(
                        TaskErrorKind::Cancelled,
                        "task cancelled",
                    )),
                    result = handler.handle(ctx) => result.map_err(|e| {
                        let kind = match e {
                            HandlerError::Cancelled => TaskErrorKind::Cancelled,
                            _ => TaskErrorKind::ExecutionFailure,
                        };
                        TaskError::new(kind, e.to_string())
                    }),
                }
            }
        };

        let response_time_ms = started.elapsed().as_millis() as u64;
        lock(&self.metrics).record(result.is_ok(), response_time_ms);

        match result {
            Ok(data) => {
                debug!(
                    worker_id = %self.worker_id,
                    task_id = %record.id,
                    action = %record.action,
                    response_time_ms,
                    "Task completed"
                );
                self.events.publish(EventKind::TaskCompleted {
                    worker_id: self.worker_id.clone(),
                    task_id: record.id.clone(),
                    action: record.action.clone(),
                    response_time_ms,
                });
                TaskOutcome::success(record.id.clone(), data, response_time_ms)
            }
            Err(error) => {
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %record.id,
                    action = %record.action,
                    kind = %error.kind,
                    error = %error.message,
                    "Task failed"
                );
                self.events.publish(EventKind::TaskFailed {
                    worker_id: self.worker_id.clone(),
                    task_id: record.id.clone(),
                    action: record.action.clone(),
                    kind: error.kind,
                    error: error.message.clone(),
                });
                TaskOutcome::failure(record.id.clone(), error, response_time_ms)
            }
        }
    }
}

#[async_trait]
impl Routable for TaskRuntime {
    async fn execute(&self, request: AgentRequest, cancel: CancellationToken) -> TaskOutcome {
        let record = TaskRecord::new(request.action, request.payload, request.context);
        // Child token: the router cancelling reaches the task, the task's own
        // cancellation does not leak back to the router.
        self.submit(record, cancel.child_token()).await
    }
}

impl Registrable for TaskRuntime {
    fn descriptor(&self) -> WorkerDescriptor {
        self.descriptor.clone()
    }
}

impl HealthCheckable for TaskRuntime {
    fn health(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            active_tasks: self.active_count(),
            max_concurrent_tasks: self.config.max_concurrent_tasks,
            backlog: self.backlog_len(),
            metrics: self.metrics(),
        }
    }
}
