use crate::types::{GroupPolicy, StepOutcome, StepResult, TaskSpec, TaskState};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vertex_core::{CancelToken, ErrorReport, Payload, VertexError, VertexResult};
use vertex_registry::{AlgorithmRegistry, ExecutionContext};

/// Terminal outcome of running one task body.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Terminal state to record.
    pub state: TaskState,
    /// Step records, in declaration order.
    pub results: Vec<StepResult>,
    /// Final output when the task produced one.
    pub output: Option<Payload>,
    /// Task-level error for failed and cancelled tasks.
    pub error: Option<VertexError>,
}

impl Execution {
    fn completed(results: Vec<StepResult>, output: Payload) -> Self {
        Self {
            state: TaskState::Completed,
            results,
            output: Some(output),
            error: None,
        }
    }

    fn failed(results: Vec<StepResult>, error: VertexError) -> Self {
        Self {
            state: TaskState::Failed,
            results,
            output: None,
            error: Some(error),
        }
    }

    fn cancelled(results: Vec<StepResult>) -> Self {
        Self {
            state: TaskState::Cancelled,
            results,
            output: None,
            error: Some(VertexError::Cancelled("task cancelled".into())),
        }
    }
}

/// Runs single, chain and group bodies against the registry, enforcing
/// timeouts and cancellation.
#[derive(Clone)]
pub struct Executor {
    registry: AlgorithmRegistry,
    cancel_grace: Duration,
    group_max_parallelism: usize,
}

impl Executor {
    /// `cancel_grace` bounds how long an unresponsive routine may ignore
    /// cancellation before it is aborted.
    pub fn new(registry: AlgorithmRegistry, cancel_grace: Duration, group_max_parallelism: usize) -> Self {
        Self {
            registry,
            cancel_grace,
            group_max_parallelism: group_max_parallelism.max(1),
        }
    }

    /// Execute `spec`. Every algorithm the task depends on stays pinned until
    /// this returns. `timeout` bounds each step or branch.
    pub async fn run(
        &self,
        task_id: Uuid,
        spec: &TaskSpec,
        payload: Payload,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Execution {
        let _pins = match self.registry.pin_all(spec.algorithms()) {
            Ok(guard) => guard,
            Err(e) => return Execution::failed(Vec::new(), e),
        };

        match spec {
            TaskSpec::Single { algorithm } => {
                let (step, error) = self.run_step(task_id, 0, algorithm, payload, timeout, cancel).await;
                match (step.outcome, error) {
                    (StepOutcome::Succeeded, _) => {
                        let output = step.output.clone().unwrap_or_default();
                        Execution::completed(vec![step], output)
                    }
                    (StepOutcome::Cancelled, _) => Execution::cancelled(vec![step]),
                    (_, error) => Execution::failed(
                        vec![step],
                        error.unwrap_or_else(|| VertexError::execution(algorithm.clone(), "unknown failure")),
                    ),
                }
            }
            TaskSpec::Chain { steps } => self.run_chain(task_id, steps, payload, timeout, cancel).await,
            TaskSpec::Group { algorithms, policy } => {
                self.run_group(task_id, algorithms, policy, payload, timeout, cancel)
                    .await
            }
        }
    }

    async fn run_chain(
        &self,
        task_id: Uuid,
        steps: &[String],
        payload: Payload,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Execution {
        let mut results = Vec::with_capacity(steps.len());
        let mut input = payload;

        for (index, algorithm) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Execution::cancelled(results);
            }
            let (step, error) = self
                .run_step(task_id, index, algorithm, input.clone(), timeout, cancel)
                .await;
            match step.outcome {
                StepOutcome::Succeeded => {
                    input = step.output.clone().unwrap_or_default();
                    results.push(step);
                }
                StepOutcome::Cancelled => {
                    results.push(step);
                    return Execution::cancelled(results);
                }
                StepOutcome::Failed | StepOutcome::TimedOut => {
                    let cause = error
                        .unwrap_or_else(|| VertexError::execution(algorithm.clone(), "unknown failure"));
                    results.push(step);
                    warn!(task_id = %task_id, step = index, algorithm = %algorithm, "Chain aborted");
                    return Execution::failed(
                        results,
                        VertexError::ChainAborted {
                            step: index,
                            algorithm: algorithm.clone(),
                            cause: Box::new(cause),
                        },
                    );
                }
            }
        }
        Execution::completed(results, input)
    }

    async fn run_group(
        &self,
        task_id: Uuid,
        algorithms: &[String],
        policy: &GroupPolicy,
        payload: Payload,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Execution {
        let required = policy.required();
        let first_n = matches!(policy, GroupPolicy::FirstN { .. });
        let group_timeout_ms = match policy {
            GroupPolicy::FirstN { timeout_ms, .. } => Some(*timeout_ms),
            GroupPolicy::WaitAll { .. } => None,
        };
        let deadline = group_timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        let permits = Semaphore::new(self.group_max_parallelism.min(algorithms.len()).max(1));
        let group_token = cancel.child();

        let mut branches: FuturesUnordered<_> = algorithms
            .iter()
            .enumerate()
            .map(|(index, algorithm)| {
                let permits = &permits;
                let token = group_token.clone();
                let input = payload.clone();
                async move {
                    let permit = tokio::select! {
                        p = permits.acquire() => p.ok(),
                        _ = token.cancelled() => None,
                    };
                    if permit.is_none() {
                        return skipped(index, algorithm, input);
                    }
                    self.run_step(task_id, index, algorithm, input, timeout, &token).await.0
                }
            })
            .collect();

        let group_deadline = async {
            match deadline {
                Some(d) => sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(group_deadline);

        let mut results = Vec::with_capacity(algorithms.len());
        let mut successes = 0;
        let mut stopped = false;
        let mut deadline_hit = false;
        loop {
            tokio::select! {
                next = branches.next() => match next {
                    Some(step) => {
                        if step.succeeded() {
                            successes += 1;
                        }
                        results.push(step);
                        if first_n && !stopped && successes >= required {
                            debug!(task_id = %task_id, successes, "Group quorum reached, cancelling the rest");
                            stopped = true;
                            group_token.cancel();
                        }
                    }
                    None => break,
                },
                _ = &mut group_deadline, if !stopped => {
                    info!(task_id = %task_id, successes, required, "Group deadline elapsed");
                    stopped = true;
                    deadline_hit = true;
                    group_token.cancel();
                }
            }
        }
        drop(branches);
        results.sort_by_key(|r| r.index);

        if cancel.is_cancelled() {
            return Execution::cancelled(results);
        }
        // Branches cut off by the group deadline timed out; they were not
        // cancelled by the caller.
        if deadline_hit {
            let timeout_ms = group_timeout_ms.unwrap_or_default();
            for step in results.iter_mut().filter(|r| r.outcome == StepOutcome::Cancelled) {
                let error = VertexError::ExecutionTimeout {
                    algorithm: step.algorithm.clone(),
                    timeout_ms,
                };
                step.outcome = StepOutcome::TimedOut;
                step.error = Some(ErrorReport::from(&error));
            }
        }
        if successes < required {
            return Execution::failed(
                results,
                VertexError::GroupPartialFailure {
                    succeeded: successes,
                    required,
                },
            );
        }

        let output: serde_json::Map<String, Payload> = results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| (r.algorithm.clone(), r.output.clone().unwrap_or_default()))
            .collect();
        let any_failed = results
            .iter()
            .any(|r| matches!(r.outcome, StepOutcome::Failed | StepOutcome::TimedOut));

        let mut execution = Execution::completed(results, Payload::Object(output));
        if any_failed {
            execution.state = TaskState::PartialSuccess;
        }
        execution
    }

    /// Acquire, run and release one algorithm under `timeout`. The error is
    /// returned alongside its recorded report so callers can wrap it.
    async fn run_step(
        &self,
        task_id: Uuid,
        index: usize,
        algorithm: &str,
        input: Payload,
        timeout: Duration,
        parent: &CancelToken,
    ) -> (StepResult, Option<VertexError>) {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let outcome = self
            .invoke(task_id, index, algorithm, input.clone(), deadline, timeout_ms, parent)
            .await;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(output) => (
                StepResult {
                    index,
                    algorithm: algorithm.to_string(),
                    input,
                    output: Some(output),
                    outcome: StepOutcome::Succeeded,
                    error: None,
                    duration_ms,
                },
                None,
            ),
            Err(e) => {
                let outcome = match &e {
                    VertexError::ExecutionTimeout { .. } => StepOutcome::TimedOut,
                    VertexError::Cancelled(_) => StepOutcome::Cancelled,
                    _ => StepOutcome::Failed,
                };
                debug!(task_id = %task_id, step = index, algorithm, error = %e, "Step did not succeed");
                let result = StepResult {
                    index,
                    algorithm: algorithm.to_string(),
                    input,
                    output: None,
                    outcome,
                    error: Some(ErrorReport::from(&e)),
                    duration_ms,
                };
                (result, Some(e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        task_id: Uuid,
        index: usize,
        algorithm: &str,
        input: Payload,
        deadline: Instant,
        timeout_ms: u64,
        parent: &CancelToken,
    ) -> VertexResult<Payload> {
        let timed_out = || VertexError::ExecutionTimeout {
            algorithm: algorithm.to_string(),
            timeout_ms,
        };
        let cancelled = || VertexError::Cancelled(format!("'{algorithm}' was cancelled"));

        let memo_key = self.registry.memo_key(algorithm, &input);
        if let Some(output) = memo_key.as_ref().and_then(|key| self.registry.memo_get(key)) {
            debug!(task_id = %task_id, step = index, algorithm, "Step served from memo");
            return Ok(output);
        }

        let handle = tokio::select! {
            biased;
            _ = parent.cancelled() => return Err(cancelled()),
            _ = sleep_until(deadline) => return Err(timed_out()),
            acquired = self.registry.acquire(algorithm) => acquired?,
        };
        self.registry.pin(algorithm)?;

        let token = parent.child();
        let ctx = ExecutionContext::new(task_id, index, token.clone());
        let mut running: JoinHandle<VertexResult<Payload>> =
            tokio::spawn(async move { handle.execute(input, &ctx).await });

        let result = tokio::select! {
            joined = &mut running => match joined {
                Ok(r) => r,
                Err(e) => Err(VertexError::execution(algorithm, format!("routine aborted: {e}"))),
            },
            _ = sleep_until(deadline) => {
                self.reclaim(algorithm, &token, &mut running).await;
                Err(timed_out())
            }
            _ = parent.cancelled() => {
                self.reclaim(algorithm, &token, &mut running).await;
                Err(cancelled())
            }
        };

        if let Err(e) = self.registry.release(algorithm) {
            warn!(algorithm, error = %e, "Release failed");
        }
        if let (Ok(output), Some(key)) = (&result, memo_key) {
            self.registry.memo_put(key, output.clone());
        }
        result
    }

    /// Signal cancellation, then abort the routine if it ignores the signal
    /// for longer than the grace period.
    async fn reclaim(
        &self,
        algorithm: &str,
        token: &CancelToken,
        running: &mut JoinHandle<VertexResult<Payload>>,
    ) {
        token.cancel();
        if tokio::time::timeout(self.cancel_grace, &mut *running).await.is_err() {
            warn!(
                algorithm,
                grace_ms = self.cancel_grace.as_millis() as u64,
                "Routine ignored cancellation; aborting"
            );
            running.abort();
        }
    }
}

/// Result recorded for a branch that never started.
fn skipped(index: usize, algorithm: &str, input: Payload) -> StepResult {
    let error = VertexError::Cancelled(format!("'{algorithm}' was not started"));
    StepResult {
        index,
        algorithm: algorithm.to_string(),
        input,
        output: None,
        outcome: StepOutcome::Cancelled,
        error: Some(ErrorReport::from(&error)),
        duration_ms: 0,
    }
}
