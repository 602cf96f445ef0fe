use crate::admission;
use crate::audit::AuditLog;
use crate::config::OrchestratorConfig;
use crate::executor::{Execution, Executor};
use crate::metrics::{AlgorithmMetrics, MetricsSnapshot, TaskCounters};
use crate::store::TaskTable;
use crate::task_queue::TaskQueue;
use crate::types::{CancelOutcome, StepOutcome, SubmitRequest, Task, TaskSpec, TaskState, TaskStatus};
use crate::vertex::{AlgorithmStats, ResizeReport, VertexPool};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vertex_core::{CancelToken, ErrorReport, Payload, VertexError, VertexResult};
use vertex_monitor::{MonitorEvent, MonitorHandle, ThresholdTier};
use vertex_registry::AlgorithmRegistry;

/// How often the scheduler loop purges tasks past their retention window.
const PURGE_EVERY: Duration = Duration::from_secs(1);

/// Work handed from the scheduler to a vertex worker.
struct Assignment {
    task_id: Uuid,
    spec: TaskSpec,
    payload: Payload,
    timeout: Duration,
    cancel: CancelToken,
}

/// Scheduler-owned mutable state. Guarded by one lock that is never held
/// across an await point.
struct EngineState {
    queue: TaskQueue,
    tasks: TaskTable,
    pool: VertexPool,
    /// Cancellation tokens of assigned or running tasks.
    running: HashMap<Uuid, CancelToken>,
    algorithm_stats: HashMap<String, AlgorithmStats>,
    counters: TaskCounters,
    workers: HashMap<usize, mpsc::UnboundedSender<Assignment>>,
}

struct EngineInner {
    config: OrchestratorConfig,
    registry: AlgorithmRegistry,
    executor: Executor,
    monitor: Option<MonitorHandle>,
    audit: Option<AuditLog>,
    state: Mutex<EngineState>,
    wake: Notify,
    shutdown: CancelToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Assignments being executed, awaited on shutdown so their outcomes
    /// reach the audit log.
    assignments: Mutex<JoinSet<()>>,
}

/// What a force-reduce removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceReduceReport {
    /// Algorithms unloaded from the cache.
    pub evicted: Vec<String>,
    /// Queued tasks cancelled to shed load.
    pub shed_tasks: Vec<Uuid>,
}

/// Configures and starts an [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: AlgorithmRegistry,
    monitor: Option<(MonitorHandle, mpsc::Receiver<MonitorEvent>)>,
    audit: Option<AuditLog>,
}

impl OrchestratorBuilder {
    /// Consult `handle` at admission and react to its events.
    pub fn monitor(mut self, handle: MonitorHandle, events: mpsc::Receiver<MonitorEvent>) -> Self {
        self.monitor = Some((handle, events));
        self
    }

    /// Record lifecycle transitions to `log`. It is closed on shutdown.
    pub fn audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(log);
        self
    }

    /// Validate the configuration and spawn the scheduler. Must be called
    /// from within a Tokio runtime.
    pub fn start(self) -> VertexResult<Orchestrator> {
        self.config.validate()?;
        let executor = Executor::new(
            self.registry.clone(),
            self.config.cancel_grace(),
            self.config.group_max_parallelism,
        );
        let pool = VertexPool::new(
            self.config.vertices,
            self.config.vertex_capacity,
            self.config.stats_alpha,
        );
        let (monitor, events) = match self.monitor {
            Some((handle, events)) => (Some(handle), Some(events)),
            None => (None, None),
        };

        let inner = Arc::new(EngineInner {
            config: self.config,
            registry: self.registry,
            executor,
            monitor,
            audit: self.audit,
            state: Mutex::new(EngineState {
                queue: TaskQueue::new(),
                tasks: TaskTable::new(),
                pool,
                running: HashMap::new(),
                algorithm_stats: HashMap::new(),
                counters: TaskCounters::default(),
                workers: HashMap::new(),
            }),
            wake: Notify::new(),
            shutdown: CancelToken::new(),
            background: Mutex::new(Vec::new()),
            assignments: Mutex::new(JoinSet::new()),
        });

        let mut background = vec![tokio::spawn(scheduler_loop(Arc::clone(&inner)))];
        if let Some(events) = events {
            background.push(tokio::spawn(monitor_events(Arc::clone(&inner), events)));
        }
        *inner.background.lock() = background;

        info!(
            vertices = inner.config.vertices,
            capacity = inner.config.vertex_capacity,
            monitored = inner.monitor.is_some(),
            "Orchestrator started"
        );
        Ok(Orchestrator { inner })
    }
}

/// Priority scheduling of single, chain and group tasks over a vertex pool.
///
/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<EngineInner>,
}

impl Orchestrator {
    /// Start configuring an engine over `registry`.
    pub fn builder(config: OrchestratorConfig, registry: AlgorithmRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            registry,
            monitor: None,
            audit: None,
        }
    }

    /// The validated configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The shared algorithm registry.
    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.inner.registry
    }

    /// The resource monitor, if one was attached.
    pub fn monitor(&self) -> Option<&MonitorHandle> {
        self.inner.monitor.as_ref()
    }

    /// Validate, admit and enqueue. Rejections are returned synchronously
    /// and never create a task.
    pub fn submit(&self, request: SubmitRequest) -> VertexResult<Uuid> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(VertexError::Validation("orchestrator is shutting down".into()));
        }
        let kind = request.spec.kind();
        let priority = request.priority;

        let admitted = admission::validate(&request, &inner.registry, &inner.config).and_then(|()| {
            match &inner.monitor {
                Some(monitor) => admission::admit(priority, &monitor.budget_status()),
                None => Ok(()),
            }
        });
        if let Err(e) = admitted {
            inner.state.lock().counters.rejected += 1;
            warn!(kind = %kind, priority = %priority, error = %e, "Submission rejected");
            if let Some(audit) = &inner.audit {
                audit.rejected(kind, priority, ErrorReport::from(&e));
            }
            return Err(e);
        }

        let task = Task::new(request, inner.config.default_timeout_ms);
        let id = task.id;
        let details = serde_json::json!({ "algorithms": task.spec.algorithms() });
        {
            let mut state = inner.state.lock();
            state.queue.push(id, priority);
            state.tasks.insert(task);
            state.counters.submitted += 1;
        }
        if let Some(audit) = &inner.audit {
            audit.submitted(id, kind, priority, details);
        }
        info!(task_id = %id, kind = %kind, priority = %priority, "Task queued");
        inner.wake.notify_one();
        Ok(id)
    }

    /// Current status of task `id`.
    pub fn status(&self, id: Uuid) -> VertexResult<TaskStatus> {
        self.inner
            .state
            .lock()
            .tasks
            .get(id)
            .map(Task::status)
            .ok_or(VertexError::TaskNotFound(id))
    }

    /// Queued tasks are removed at once; assigned or running tasks are
    /// signalled and resolve `Cancelled` once their routines stop.
    pub fn cancel(&self, id: Uuid) -> VertexResult<CancelOutcome> {
        let inner = &self.inner;
        let removed = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(id) else {
                return Err(VertexError::TaskNotFound(id));
            };
            match task.state {
                TaskState::Queued => {
                    state.queue.remove(id);
                    task.error = Some(ErrorReport::from(&VertexError::Cancelled(
                        "cancelled while queued".into(),
                    )));
                    task.transition(TaskState::Cancelled)?;
                    state.counters.record_terminal(TaskState::Cancelled);
                    Some((task.spec.kind(), task.priority, task.error.clone()))
                }
                TaskState::Assigned | TaskState::Running => {
                    if let Some(token) = state.running.get(&id) {
                        token.cancel();
                    }
                    info!(task_id = %id, "Cancellation signalled");
                    return Ok(CancelOutcome::Signalled);
                }
                finished => return Ok(CancelOutcome::AlreadyFinished(finished)),
            }
        };

        if let (Some(audit), Some((kind, priority, error))) = (&inner.audit, removed) {
            audit.finished(id, kind, priority, TaskState::Cancelled, error, serde_json::Value::Null);
        }
        info!(task_id = %id, "Queued task cancelled");
        Ok(CancelOutcome::Removed)
    }

    /// Poll until `id` is terminal or `timeout` elapses; returns the last
    /// observed status either way.
    pub async fn wait_for(&self, id: Uuid, timeout: Duration) -> VertexResult<TaskStatus> {
        let deadline = Instant::now() + timeout;
        let poll = self.inner.config.tick().min(Duration::from_millis(10));
        loop {
            let status = self.status(id)?;
            if status.state.is_terminal() || Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Assign queued tasks while any vertex has spare capacity. Returns the
    /// number of tasks assigned.
    pub fn schedule_tick(&self) -> usize {
        self.inner.schedule()
    }

    /// Evict unpinned cold cache entries and shed queued priority 4 and 5
    /// tasks.
    pub fn force_reduce(&self) -> ForceReduceReport {
        self.inner.force_reduce()
    }

    /// Grow or shrink the vertex pool. Busy vertices selected for removal
    /// stop taking work and disappear once idle.
    pub fn resize_pool(&self, vertices: usize) -> VertexResult<ResizeReport> {
        if vertices == 0 {
            return Err(VertexError::Validation("vertex pool cannot be empty".into()));
        }
        let report = {
            let mut state = self.inner.state.lock();
            let report = state.pool.resize(vertices);
            for id in &report.removed {
                state.workers.remove(id);
            }
            report
        };
        info!(
            vertices,
            added = ?report.added,
            removed = ?report.removed,
            retiring = ?report.retiring,
            "Vertex pool resized"
        );
        self.inner.wake.notify_one();
        Ok(report)
    }

    /// Queue, vertex, cache and budget figures at this instant.
    pub fn metrics(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let (budget, cost_per_hour) = match &inner.monitor {
            Some(m) => (Some(m.budget_status()), m.current().map(|s| s.cost_per_hour)),
            None => (None, None),
        };
        let state = inner.state.lock();
        MetricsSnapshot {
            taken_at: Utc::now(),
            queue_depth: state.queue.len(),
            queue_by_priority: state.queue.depth_by_priority(),
            running: state.running.len(),
            retained_tasks: state.tasks.len(),
            tasks: state.counters.clone(),
            vertices: state.pool.snapshot(),
            cache: inner.registry.stats(),
            cache_entries: inner.registry.snapshot(),
            budget,
            cost_per_hour,
            algorithms: state
                .algorithm_stats
                .iter()
                .map(|(id, s)| (id.clone(), AlgorithmMetrics::from(s)))
                .collect(),
        }
    }

    /// Stop scheduling, cancel running work, wait for background loops and
    /// in-flight assignments, then flush the audit log.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.state.lock().workers.clear();
        let handles: Vec<JoinHandle<()>> = inner.background.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let mut assignments = std::mem::take(&mut *inner.assignments.lock());
        // Cancelled routines are reclaimed within the grace period.
        let drain_limit = inner.config.cancel_grace() + Duration::from_secs(1);
        let drained = tokio::time::timeout(drain_limit, async {
            while assignments.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = assignments.len(),
                "Assignments still running at shutdown; aborting"
            );
            assignments.abort_all();
        }

        if let Some(audit) = &inner.audit {
            audit.close().await;
        }
        info!("Orchestrator stopped");
    }
}

impl EngineInner {
    fn schedule(self: &Arc<Self>) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }
        let registry = &self.registry;
        let fallback = |algorithm: &str| {
            registry
                .describe(algorithm)
                .map(|d| d.estimated_execution_ms as f64)
                .unwrap_or(0.0)
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut assigned = 0;

        while state.pool.has_spare_capacity() {
            let Some(id) = state.queue.peek_next() else {
                break;
            };
            let Some(task) = state.tasks.get_mut(id) else {
                state.queue.remove(id);
                continue;
            };
            let Some((vertex, expected_ms)) =
                state
                    .pool
                    .select(&task.spec, self.config.group_max_parallelism, &fallback)
            else {
                break;
            };
            state.queue.remove(id);
            if let Err(e) = task.transition(TaskState::Assigned) {
                error!(task_id = %id, error = %e, "Queued task in unexpected state");
                continue;
            }
            task.assigned_vertex = Some(vertex);
            state.pool.assign(vertex, id, expected_ms);

            let cancel = self.shutdown.child();
            state.running.insert(id, cancel.clone());
            let assignment = Assignment {
                task_id: id,
                spec: task.spec.clone(),
                payload: task.payload.clone(),
                timeout: Duration::from_millis(task.timeout_ms),
                cancel,
            };
            debug!(task_id = %id, vertex, expected_ms, "Task assigned");
            self.dispatch(&mut state.workers, vertex, assignment);
            assigned += 1;
        }
        assigned
    }

    /// Hand an assignment to the vertex's worker, starting one if needed.
    fn dispatch(
        self: &Arc<Self>,
        workers: &mut HashMap<usize, mpsc::UnboundedSender<Assignment>>,
        vertex: usize,
        assignment: Assignment,
    ) {
        let tx = workers
            .entry(vertex)
            .or_insert_with(|| spawn_worker(Arc::clone(self), vertex));
        if let Err(mpsc::error::SendError(assignment)) = tx.send(assignment) {
            warn!(vertex, "Vertex worker gone; restarting");
            let tx = spawn_worker(Arc::clone(self), vertex);
            if tx.send(assignment).is_err() {
                error!(vertex, "Restarted vertex worker rejected assignment");
            }
            workers.insert(vertex, tx);
        }
    }

    async fn run_assignment(self: Arc<Self>, vertex: usize, assignment: Assignment) {
        let id = assignment.task_id;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let started = match state.tasks.get_mut(id) {
                Some(task) => task.transition(TaskState::Running).map_err(|e| {
                    error!(task_id = %id, error = %e, "Cannot start task");
                }),
                None => Err(()),
            };
            if started.is_err() {
                state.pool.release(vertex, id);
                state.running.remove(&id);
                return;
            }
        }
        info!(task_id = %id, vertex, "Task running");

        let execution = self
            .executor
            .run(
                id,
                &assignment.spec,
                assignment.payload,
                assignment.timeout,
                &assignment.cancel,
            )
            .await;
        self.finish(vertex, id, execution);
    }

    fn finish(&self, vertex: usize, id: Uuid, execution: Execution) {
        let Execution {
            state: terminal,
            results,
            output,
            error,
        } = execution;
        let report = error.as_ref().map(ErrorReport::from);

        let audit_entry = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for step in results.iter().filter(|s| s.outcome != StepOutcome::Cancelled) {
                let ms = step.duration_ms as f64;
                state.pool.record(vertex, &step.algorithm, ms, step.succeeded());
                state
                    .algorithm_stats
                    .entry(step.algorithm.clone())
                    .or_default()
                    .record(ms, step.succeeded(), self.config.stats_alpha);
            }
            if state.pool.release(vertex, id) {
                state.workers.remove(&vertex);
                info!(vertex, "Retired vertex removed");
            }
            state.running.remove(&id);
            state.counters.record_terminal(terminal);

            match state.tasks.get_mut(id) {
                Some(task) => {
                    let steps = results.len();
                    task.results = results;
                    task.output = output;
                    task.error = report.clone();
                    if let Err(e) = task.transition(terminal) {
                        error!(task_id = %id, error = %e, "Illegal terminal transition");
                    }
                    Some((task.spec.kind(), task.priority, steps))
                }
                None => None,
            }
        };

        match (&error, terminal) {
            (Some(e), TaskState::Failed) => error!(task_id = %id, vertex, error = %e, "Task failed"),
            (_, state) => info!(task_id = %id, vertex, state = %state, "Task finished"),
        }
        if let (Some(audit), Some((kind, priority, steps))) = (&self.audit, audit_entry) {
            audit.finished(
                id,
                kind,
                priority,
                terminal,
                report,
                serde_json::json!({ "vertex": vertex, "steps": steps }),
            );
        }
        self.wake.notify_one();
    }

    fn force_reduce(&self) -> ForceReduceReport {
        let evicted = self.registry.shed_cold();
        let reason = VertexError::ResourceExhausted("shed by force-reduce".into());
        let report = ErrorReport::from(&reason);

        let shed: Vec<(Uuid, crate::types::TaskKind, vertex_core::Priority)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let ids = state.queue.shed_non_critical();
            let mut shed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(task) = state.tasks.get_mut(id) {
                    task.error = Some(report.clone());
                    if task.transition(TaskState::Cancelled).is_ok() {
                        state.counters.record_terminal(TaskState::Cancelled);
                        state.counters.shed += 1;
                        shed.push((id, task.spec.kind(), task.priority));
                    }
                }
            }
            shed
        };

        if let Some(audit) = &self.audit {
            for (id, kind, priority) in &shed {
                audit.finished(
                    *id,
                    *kind,
                    *priority,
                    TaskState::Cancelled,
                    Some(report.clone()),
                    serde_json::json!({ "shed": true }),
                );
            }
        }
        warn!(
            evicted = evicted.len(),
            shed = shed.len(),
            "Force-reduce applied"
        );
        ForceReduceReport {
            evicted,
            shed_tasks: shed.into_iter().map(|(id, _, _)| id).collect(),
        }
    }

    fn purge_expired(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.config.retention()) else {
            return;
        };
        let purged = self.state.lock().tasks.purge_finished_before(Utc::now() - retention);
        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged expired tasks");
        }
    }
}

fn spawn_worker(inner: Arc<EngineInner>, vertex: usize) -> mpsc::UnboundedSender<Assignment> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Assignment>();
    tokio::spawn(async move {
        debug!(vertex, "Vertex worker started");
        while let Some(assignment) = rx.recv().await {
            let run = Arc::clone(&inner).run_assignment(vertex, assignment);
            let mut assignments = inner.assignments.lock();
            while assignments.try_join_next().is_some() {}
            assignments.spawn(run);
        }
        debug!(vertex, "Vertex worker stopped");
    });
    tx
}

/// Event-driven scheduling with a periodic fallback tick.
async fn scheduler_loop(inner: Arc<EngineInner>) {
    let mut tick = tokio::time::interval(inner.config.tick());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_purge = Instant::now();
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wake.notified() => {}
            _ = tick.tick() => {}
        }
        inner.schedule();
        if last_purge.elapsed() >= PURGE_EVERY {
            inner.purge_expired();
            last_purge = Instant::now();
        }
    }
    debug!("Scheduler loop stopped");
}

/// Consume monitor events in tick order.
async fn monitor_events(inner: Arc<EngineInner>, mut events: mpsc::Receiver<MonitorEvent>) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            MonitorEvent::TierChanged { from, to, .. } => {
                info!(from = %from, to = %to, "Budget tier changed");
                if to == ThresholdTier::ForceReduce {
                    inner.force_reduce();
                }
            }
            MonitorEvent::SampleMissed { reason, consecutive } => {
                debug!(reason = %reason, consecutive, "Monitor missed a sample");
            }
            MonitorEvent::WindowClosed(summary) => {
                info!(total_cost = summary.total_cost, samples = summary.samples, "Billing window closed");
            }
            MonitorEvent::Sample(_) => {}
        }
    }
    debug!("Monitor event consumer stopped");
}
