#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests of the engine: placement, chains, groups, admission
//! under budget pressure, cancellation and the audit trail.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use vertex_core::{CancelToken, Payload, Priority, VertexError, VertexResult};
use vertex_monitor::{ManualSampler, MonitorConfig, RawUsage, ResourceMonitor, ThresholdTier};
use vertex_orchestrator::{
    AuditAction, AuditEntry, AuditLog, CancelOutcome, GroupPolicy, Orchestrator, OrchestratorConfig,
    StepOutcome, SubmitRequest, TaskSpec, TaskState,
};
use vertex_registry::{
    AlgorithmCatalog, AlgorithmCategory, AlgorithmDescriptor, AlgorithmLoader, AlgorithmRegistry,
    CacheConfig, Executable, ExecutionContext,
};

const WAIT: Duration = Duration::from_secs(5);

struct AddN(f64);

#[async_trait]
impl Executable for AddN {
    async fn execute(&self, input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
        let n = input
            .as_f64()
            .ok_or_else(|| VertexError::execution("add", "expected a number"))?;
        Ok(json!(n + self.0))
    }
}

struct Fail;

#[async_trait]
impl Executable for Fail {
    async fn execute(&self, _input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
        Err(VertexError::execution("fail", "deliberate failure"))
    }
}

/// Sleeps, honouring cancellation.
struct Sleep(Duration);

#[async_trait]
impl Executable for Sleep {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        tokio::select! {
            _ = tokio::time::sleep(self.0) => Ok(input),
            _ = ctx.cancel.cancelled() => Err(VertexError::Cancelled("sleep interrupted".into())),
        }
    }
}

/// Sleeps and ignores cancellation.
struct Stubborn;

#[async_trait]
impl Executable for Stubborn {
    async fn execute(&self, input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(input)
    }
}

/// Runs until a permit is released on the shared gate.
struct Hold(Arc<Semaphore>);

#[async_trait]
impl Executable for Hold {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        tokio::select! {
            permit = self.0.acquire() => {
                permit.expect("gate closed").forget();
                Ok(input)
            }
            _ = ctx.cancel.cancelled() => Err(VertexError::Cancelled("hold interrupted".into())),
        }
    }
}

/// Doubles its input and counts invocations.
struct Counted(Arc<AtomicUsize>);

#[async_trait]
impl Executable for Counted {
    async fn execute(&self, input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
        self.0.fetch_add(1, Ordering::SeqCst);
        let n = input
            .as_f64()
            .ok_or_else(|| VertexError::execution("counted", "expected a number"))?;
        Ok(json!(n * 2.0))
    }
}

/// Slow loader counting how often it runs.
struct CountingLoader(Arc<AtomicUsize>);

#[async_trait]
impl AlgorithmLoader for CountingLoader {
    async fn load(&self, _descriptor: &AlgorithmDescriptor) -> VertexResult<Arc<dyn Executable>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Arc::new(AddN(100.0)))
    }
}

fn descriptor(id: &str) -> AlgorithmDescriptor {
    AlgorithmDescriptor::new(id, AlgorithmCategory::Predictive, "any", "any")
}

fn register<E: Executable + 'static>(catalog: &mut AlgorithmCatalog, id: &str, make: fn() -> E) {
    catalog
        .register_fn(descriptor(id), move || Ok(Arc::new(make()) as Arc<dyn Executable>))
        .unwrap();
}

struct Fixture {
    registry: AlgorithmRegistry,
    gate: Arc<Semaphore>,
    slow_loads: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let gate = Arc::new(Semaphore::new(0));
    let slow_loads = Arc::new(AtomicUsize::new(0));
    let mut catalog = AlgorithmCatalog::new();
    register(&mut catalog, "add_one", || AddN(1.0));
    register(&mut catalog, "add_two", || AddN(2.0));
    register(&mut catalog, "add_three", || AddN(3.0));
    register(&mut catalog, "fail", || Fail);
    register(&mut catalog, "slow", || Sleep(Duration::from_millis(500)));
    register(&mut catalog, "nap", || Sleep(Duration::from_millis(30)));
    register(&mut catalog, "stubborn", || Stubborn);
    let hold_gate = gate.clone();
    catalog
        .register_fn(descriptor("hold"), move || {
            Ok(Arc::new(Hold(hold_gate.clone())) as Arc<dyn Executable>)
        })
        .unwrap();
    catalog
        .register(descriptor("slow_load"), Arc::new(CountingLoader(slow_loads.clone())))
        .unwrap();

    Fixture {
        registry: AlgorithmRegistry::new(catalog, CacheConfig::default()),
        gate,
        slow_loads,
    }
}

fn config(vertices: usize, capacity: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        vertices,
        vertex_capacity: capacity,
        tick_ms: 10,
        cancel_grace_ms: 50,
        ..OrchestratorConfig::default()
    }
}

fn single(algorithm: &str, payload: Payload) -> SubmitRequest {
    SubmitRequest::new(
        TaskSpec::Single {
            algorithm: algorithm.into(),
        },
        payload,
    )
}

fn chain(steps: &[&str], payload: Payload) -> SubmitRequest {
    SubmitRequest::new(
        TaskSpec::Chain {
            steps: steps.iter().map(|s| s.to_string()).collect(),
        },
        payload,
    )
}

fn group(algorithms: &[&str], policy: GroupPolicy, payload: Payload) -> SubmitRequest {
    SubmitRequest::new(
        TaskSpec::Group {
            algorithms: algorithms.iter().map(|s| s.to_string()).collect(),
            policy,
        },
        payload,
    )
}

#[tokio::test]
async fn test_single_task_completes_on_idle_pool() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(2, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(single("add_one", json!(41)).with_priority(Priority::CRITICAL))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.output, Some(json!(42.0)));
    assert_eq!(
        status.transitions,
        vec![
            TaskState::Queued,
            TaskState::Assigned,
            TaskState::Running,
            TaskState::Completed
        ]
    );
    assert!(status.assigned_vertex.is_none());
    assert_eq!(orch.metrics().algorithms["add_one"].runs, 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_tasks_share_one_load() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(5, 2), fx.registry.clone()).start().unwrap();

    let ids: Vec<_> = (0..10)
        .map(|i| orch.submit(single("slow_load", json!(i))).unwrap())
        .collect();
    for (i, id) in ids.into_iter().enumerate() {
        let status = orch.wait_for(id, WAIT).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.output, Some(json!(i as f64 + 100.0)));
    }
    assert_eq!(fx.slow_loads.load(Ordering::SeqCst), 1);
    assert_eq!(fx.registry.load_count("slow_load"), 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_memory_pressure_rejects_background_work() {
    let fx = fixture();
    let sampler = ManualSampler::new(RawUsage::default());
    let shutdown = CancelToken::new();
    let monitor_config = MonitorConfig {
        interval_ms: 20,
        ..MonitorConfig::default()
    };
    let (handle, events) =
        ResourceMonitor::spawn(monitor_config, sampler.clone(), Vec::new(), shutdown.clone())
            .unwrap();
    let orch = Orchestrator::builder(config(2, 1), fx.registry.clone())
        .monitor(handle.clone(), events)
        .start()
        .unwrap();

    sampler.set_memory_percent(96.0);
    tokio::time::timeout(WAIT, async {
        while handle.budget_status().tier != ThresholdTier::ForceReduce {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let rejected = orch
        .submit(single("add_one", json!(1)).with_priority(Priority::BACKGROUND))
        .unwrap_err();
    assert_eq!(rejected.kind(), "ResourceExhaustedError");

    let id = orch
        .submit(single("add_one", json!(1)).with_priority(Priority::CRITICAL))
        .unwrap();
    assert_eq!(orch.wait_for(id, WAIT).await.unwrap().state, TaskState::Completed);
    assert_eq!(orch.metrics().tasks.rejected, 1);

    orch.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn test_chain_aborts_at_failing_step() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(2, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(chain(&["add_one", "fail", "add_two"], json!(1)))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.kind, "ChainAbortedError");
    assert!(error.message.contains("step 1"));
    assert_eq!(status.results.len(), 2);
    assert_eq!(status.results[0].output, Some(json!(2.0)));
    assert_eq!(status.results[1].outcome, StepOutcome::Failed);
    assert!(status.results.iter().all(|r| r.algorithm != "add_two"));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_group_wait_all_with_one_timeout() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(2, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(
            group(
                &["add_one", "add_two", "add_three", "slow"],
                GroupPolicy::WaitAll { min_success: 1 },
                json!(10),
            )
            .with_timeout_ms(100),
        )
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::PartialSuccess);
    let succeeded = status
        .results
        .iter()
        .filter(|r| r.outcome == StepOutcome::Succeeded)
        .count();
    assert_eq!(succeeded, 3);
    let timed_out: Vec<_> = status
        .results
        .iter()
        .filter(|r| r.outcome == StepOutcome::TimedOut)
        .collect();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].algorithm, "slow");
    assert_eq!(
        timed_out[0].error.as_ref().unwrap().kind,
        "ExecutionTimeoutError"
    );

    let output = status.output.unwrap();
    assert_eq!(output["add_three"], json!(13.0));
    assert!(output.get("slow").is_none());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_group_first_n_cancels_stragglers() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(group(
            &["add_one", "add_two", "slow"],
            GroupPolicy::FirstN {
                required: 2,
                timeout_ms: 2_000,
            },
            json!(0),
        ))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::Completed);
    let slow = status.results.iter().find(|r| r.algorithm == "slow").unwrap();
    assert_eq!(slow.outcome, StepOutcome::Cancelled);
    assert_eq!(status.output.unwrap().as_object().unwrap().len(), 2);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_group_deadline_times_out_stragglers() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(group(
            &["add_one", "slow"],
            GroupPolicy::FirstN {
                required: 2,
                timeout_ms: 100,
            },
            json!(0),
        ))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.error.unwrap().kind, "GroupPartialFailure");
    let slow = status.results.iter().find(|r| r.algorithm == "slow").unwrap();
    assert_eq!(slow.outcome, StepOutcome::TimedOut);
    assert_eq!(slow.error.as_ref().unwrap().kind, "ExecutionTimeoutError");
    let fast = status.results.iter().find(|r| r.algorithm == "add_one").unwrap();
    assert_eq!(fast.outcome, StepOutcome::Succeeded);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_repeated_deterministic_step_served_from_memo() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut catalog = AlgorithmCatalog::new();
    catalog
        .register_fn(descriptor("counted"), move || {
            Ok(Arc::new(Counted(counter.clone())) as Arc<dyn Executable>)
        })
        .unwrap();
    let cache = CacheConfig {
        memo_capacity: 8,
        ..CacheConfig::default()
    };
    let registry = AlgorithmRegistry::new(catalog, cache);
    let orch = Orchestrator::builder(config(1, 1), registry.clone()).start().unwrap();

    let mut outputs = Vec::new();
    for payload in [json!(2), json!(2), json!(3)] {
        let id = orch.submit(single("counted", payload)).unwrap();
        let status = orch.wait_for(id, WAIT).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        outputs.push(status.output.unwrap());
    }

    assert_eq!(outputs, vec![json!(4.0), json!(4.0), json!(6.0)]);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let memo = registry.stats().memo;
    assert_eq!((memo.hits, memo.entries), (1, 2));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_group_below_minimum_fails() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(group(
            &["add_one", "fail"],
            GroupPolicy::WaitAll { min_success: 2 },
            json!(0),
        ))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.error.unwrap().kind, "GroupPartialFailure");
    // the successful branch is kept for inspection
    assert_eq!(status.results.len(), 2);
    assert!(status.results[0].output.is_some());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_chain_feeds_outputs_verbatim() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(chain(&["add_one", "add_two", "add_one", "add_three"], json!(0)))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.results.len(), 4);
    for pair in status.results.windows(2) {
        assert_eq!(Some(&pair[1].input), pair[0].output.as_ref());
    }
    assert_eq!(status.output, Some(json!(7.0)));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_terminal_status_is_stable() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch.submit(chain(&["add_one", "fail"], json!(0))).unwrap();
    let first = orch.wait_for(id, WAIT).await.unwrap();
    assert!(first.state.is_terminal());
    for _ in 0..5 {
        assert_eq!(orch.status(id).unwrap(), first);
    }
    assert!(matches!(
        orch.status(uuid::Uuid::new_v4()),
        Err(VertexError::TaskNotFound(_))
    ));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_and_running() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let running = orch.submit(single("hold", json!(0))).unwrap();
    tokio::time::timeout(WAIT, async {
        while orch.status(running).unwrap().state != TaskState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let queued = orch.submit(single("add_one", json!(0))).unwrap();
    assert_eq!(orch.status(queued).unwrap().state, TaskState::Queued);
    assert_eq!(orch.cancel(queued).unwrap(), CancelOutcome::Removed);
    let status = orch.status(queued).unwrap();
    assert_eq!(status.transitions, vec![TaskState::Queued, TaskState::Cancelled]);
    assert!(status.results.is_empty());

    assert_eq!(orch.cancel(running).unwrap(), CancelOutcome::Signalled);
    let status = orch.wait_for(running, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Cancelled);
    assert_eq!(
        orch.cancel(running).unwrap(),
        CancelOutcome::AlreadyFinished(TaskState::Cancelled)
    );
    assert_eq!(orch.metrics().running, 0);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_unresponsive_routine_is_reclaimed() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let id = orch
        .submit(single("stubborn", json!(0)).with_timeout_ms(50))
        .unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.error.unwrap().kind, "ExecutionTimeoutError");

    // The slot is free again.
    let next = orch.submit(single("add_one", json!(1))).unwrap();
    assert_eq!(orch.wait_for(next, WAIT).await.unwrap().state, TaskState::Completed);
    assert_eq!(orch.metrics().vertices[0].load, 0);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_priority_order_on_busy_pool() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let blocker = orch.submit(single("hold", json!(0))).unwrap();
    tokio::time::timeout(WAIT, async {
        while orch.status(blocker).unwrap().state != TaskState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let low = orch
        .submit(single("nap", json!(0)).with_priority(Priority::LOW))
        .unwrap();
    let critical = orch
        .submit(single("nap", json!(0)).with_priority(Priority::CRITICAL))
        .unwrap();
    fx.gate.add_permits(1);

    let low = orch.wait_for(low, WAIT).await.unwrap();
    let critical = orch.wait_for(critical, WAIT).await.unwrap();
    assert!(critical.finished_at.unwrap() <= low.finished_at.unwrap());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_work_conserving_under_random_load() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(3, 2), fx.registry.clone()).start().unwrap();
    let capacity = 6;

    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    let total = 25;
    for _ in 0..total {
        let priority = Priority::new((next() % 5) as u8 + 1).unwrap();
        orch.submit(single("hold", json!(0)).with_priority(priority))
            .unwrap();
    }

    let mut finished = 0;
    while finished < total {
        orch.schedule_tick();
        let m = orch.metrics();
        let remaining = total - finished;
        assert_eq!(m.running, remaining.min(capacity));
        assert_eq!(m.queue_depth, remaining - m.running);
        if m.queue_depth > 0 {
            assert!(m.vertices.iter().all(|v| v.load == v.capacity));
        }

        let release = ((next() % 3) as usize + 1).min(remaining);
        fx.gate.add_permits(release);
        finished += release;
        let target = finished as u64;
        tokio::time::timeout(WAIT, async {
            while orch.metrics().tasks.completed < target {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }
    orch.shutdown().await;
}

#[tokio::test]
async fn test_force_reduce_sheds_low_priority_queue() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let blocker = orch.submit(single("hold", json!(0))).unwrap();
    tokio::time::timeout(WAIT, async {
        while orch.status(blocker).unwrap().state != TaskState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let low = orch
        .submit(single("add_one", json!(0)).with_priority(Priority::LOW))
        .unwrap();
    let background = orch
        .submit(single("add_one", json!(0)).with_priority(Priority::BACKGROUND))
        .unwrap();
    let high = orch
        .submit(single("add_one", json!(0)).with_priority(Priority::HIGH))
        .unwrap();

    let report = orch.force_reduce();
    assert_eq!(report.shed_tasks, vec![low, background]);
    for id in [low, background] {
        let status = orch.status(id).unwrap();
        assert_eq!(status.state, TaskState::Cancelled);
        assert_eq!(status.error.unwrap().kind, "ResourceExhaustedError");
    }
    assert_eq!(orch.status(high).unwrap().state, TaskState::Queued);

    fx.gate.add_permits(1);
    assert_eq!(orch.wait_for(high, WAIT).await.unwrap().state, TaskState::Completed);
    assert_eq!(orch.metrics().tasks.shed, 2);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_resize_pool() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(2, 1), fx.registry.clone()).start().unwrap();

    let report = orch.resize_pool(4).unwrap();
    assert_eq!(report.added, vec![2, 3]);
    assert_eq!(orch.metrics().vertices.len(), 4);

    let report = orch.resize_pool(1).unwrap();
    assert_eq!(report.removed, vec![3, 2, 1]);
    assert!(orch.resize_pool(0).is_err());

    let id = orch.submit(single("add_two", json!(1))).unwrap();
    let status = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(orch.metrics().vertices[0].id, 0);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_rejected_submission_creates_no_task() {
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone()).start().unwrap();

    let err = orch.submit(chain(&[], json!(0))).unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    let err = orch.submit(single("missing", json!(0))).unwrap_err();
    assert_eq!(err.kind(), "AlgorithmNotFoundError");

    let m = orch.metrics();
    assert_eq!(m.retained_tasks, 0);
    assert_eq!(m.tasks.rejected, 2);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_audit_log_records_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let fx = fixture();
    let log = AuditLog::open(dir.path().to_path_buf());
    let orch = Orchestrator::builder(config(1, 1), fx.registry.clone())
        .audit(log)
        .start()
        .unwrap();

    let id = orch.submit(single("add_one", json!(1))).unwrap();
    assert!(orch.submit(single("missing", json!(1))).is_err());
    orch.wait_for(id, WAIT).await.unwrap();

    let path = dir.path().join("audit.jsonl");
    let entries: Vec<AuditEntry> = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(&path).await {
                let entries: Vec<AuditEntry> = text
                    .lines()
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect();
                if entries.len() >= 3 {
                    return entries;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let for_task: Vec<_> = entries.iter().filter(|e| e.task_id == Some(id)).collect();
    assert_eq!(for_task.len(), 2);
    assert_eq!(for_task[1].state, Some(TaskState::Completed));
    assert!(entries.iter().any(|e| e.task_id.is_none()
        && e.error.as_ref().is_some_and(|r| r.kind == "AlgorithmNotFoundError")));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let fx = fixture();
    let orch = Orchestrator::builder(config(1, 2), fx.registry.clone())
        .audit(AuditLog::open(dir.path().to_path_buf()))
        .start()
        .unwrap();

    let done = orch.submit(single("add_one", json!(1))).unwrap();
    orch.wait_for(done, WAIT).await.unwrap();
    let held = orch.submit(single("hold", json!(0))).unwrap();
    tokio::time::timeout(WAIT, async {
        while orch.status(held).unwrap().state != TaskState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    orch.shutdown().await;

    // Read immediately: everything logged before shutdown returned is on disk.
    let text = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    let entries: Vec<AuditEntry> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let finished = |id| {
        entries
            .iter()
            .find(|e| e.task_id == Some(id) && e.action == AuditAction::Finished)
            .and_then(|e| e.state)
    };
    assert_eq!(finished(done), Some(TaskState::Completed));
    assert_eq!(finished(held), Some(TaskState::Cancelled));
}
