use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vertex_core::{ErrorReport, Payload, Priority, VertexError, VertexResult};

/// Shape of a submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    /// One algorithm applied to the payload.
    Single {
        /// Registered algorithm id.
        algorithm: String,
    },
    /// Each step's output becomes the next step's input.
    Chain {
        /// Algorithm ids in execution order.
        steps: Vec<String>,
    },
    /// Every member runs against the same input.
    Group {
        /// Algorithm ids, one branch each.
        algorithms: Vec<String>,
        /// Aggregation rule for the branch outcomes.
        #[serde(default)]
        policy: GroupPolicy,
    },
}

impl TaskSpec {
    /// Discriminant without the payload.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::Single { .. } => TaskKind::Single,
            TaskSpec::Chain { .. } => TaskKind::Chain,
            TaskSpec::Group { .. } => TaskKind::Group,
        }
    }

    /// Every algorithm id the task depends on, in declaration order.
    pub fn algorithms(&self) -> Vec<&str> {
        match self {
            TaskSpec::Single { algorithm } => vec![algorithm.as_str()],
            TaskSpec::Chain { steps } => steps.iter().map(String::as_str).collect(),
            TaskSpec::Group { algorithms, .. } => algorithms.iter().map(String::as_str).collect(),
        }
    }
}

/// [`TaskSpec`] variant, used in metrics and the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// [`TaskSpec::Single`].
    Single,
    /// [`TaskSpec::Chain`].
    Chain,
    /// [`TaskSpec::Group`].
    Group,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Single => write!(f, "single"),
            TaskKind::Chain => write!(f, "chain"),
            TaskKind::Group => write!(f, "group"),
        }
    }
}

/// How group branch outcomes are aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GroupPolicy {
    /// Resolve once every branch has finished or failed.
    WaitAll {
        /// Fewer successes than this fail the group.
        #[serde(default = "default_min_success")]
        min_success: usize,
    },
    /// Resolve once `required` branches succeed or `timeout_ms` elapses.
    /// Branches still running at quorum are cancelled; those cut off by the
    /// deadline are recorded as timed out.
    FirstN {
        /// Successes needed to resolve early.
        required: usize,
        /// Group deadline, measured from the start of the group.
        timeout_ms: u64,
    },
}

fn default_min_success() -> usize {
    1
}

impl Default for GroupPolicy {
    fn default() -> Self {
        GroupPolicy::WaitAll {
            min_success: default_min_success(),
        }
    }
}

impl GroupPolicy {
    /// Minimum successful branches for the group not to fail.
    pub fn required(&self) -> usize {
        match self {
            GroupPolicy::WaitAll { min_success } => *min_success,
            GroupPolicy::FirstN { required, .. } => *required,
        }
    }
}

/// Task lifecycle.
///
/// `Queued → Assigned → Running → {Completed | Failed | PartialSuccess | Cancelled}`,
/// plus `Queued → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Admitted and waiting for a vertex.
    Queued,
    /// Placed on a vertex, not yet started.
    Assigned,
    /// Executing.
    Running,
    /// Every step succeeded.
    Completed,
    /// The task produced no usable output.
    Failed,
    /// A group met its minimum but some branches failed or timed out.
    PartialSuccess,
    /// Cancelled by a caller, by shedding or by shutdown.
    Cancelled,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::PartialSuccess | TaskState::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Assigned)
                | (Queued, Cancelled)
                | (Assigned, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, PartialSuccess)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Assigned => "assigned",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::PartialSuccess => "partial_success",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a single step or branch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Produced an output.
    Succeeded,
    /// The algorithm, or loading it, returned an error.
    Failed,
    /// Exceeded the task timeout or the group deadline.
    TimedOut,
    /// Stopped by cancellation, or never started.
    Cancelled,
}

/// One chain step or group branch, recorded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the chain or group declaration.
    pub index: usize,
    /// Algorithm id.
    pub algorithm: String,
    /// Input the step received.
    pub input: Payload,
    /// Present only on success.
    pub output: Option<Payload>,
    /// How the step ended.
    pub outcome: StepOutcome,
    /// Present unless the step succeeded.
    pub error: Option<ErrorReport>,
    /// Wall time spent, including the load on a cache miss.
    pub duration_ms: u64,
}

impl StepResult {
    /// Shorthand for `outcome == Succeeded`.
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Succeeded
    }
}

/// Ingress request for `SubmitTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// What to run.
    pub spec: TaskSpec,
    /// Input of the first step, or of every group branch.
    #[serde(default)]
    pub payload: Payload,
    /// Lower value runs first.
    #[serde(default)]
    pub priority: Priority,
    /// Falls back to the engine default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SubmitRequest {
    /// Request at default priority and timeout.
    pub fn new(spec: TaskSpec, payload: Payload) -> Self {
        Self {
            spec,
            payload,
            priority: Priority::default(),
            timeout_ms: None,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the per-step timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Engine-owned task record.
#[derive(Debug, Clone)]
pub struct Task {
    /// Assigned at admission.
    pub id: Uuid,
    /// What to run.
    pub spec: TaskSpec,
    /// Scheduling priority.
    pub priority: Priority,
    /// Submitted input.
    pub payload: Payload,
    /// Bound on each step or branch.
    pub timeout_ms: u64,
    /// Admission time.
    pub submitted_at: DateTime<Utc>,
    /// Set on the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Vertex holding the task while assigned or running.
    pub assigned_vertex: Option<usize>,
    /// Step records, in declaration order.
    pub results: Vec<StepResult>,
    /// Final output of a completed or partially successful task.
    pub output: Option<Payload>,
    /// Cause of failure or cancellation.
    pub error: Option<ErrorReport>,
    /// Every state the task has been in, oldest first.
    pub transitions: Vec<TaskState>,
}

impl Task {
    /// Fresh `Queued` record with a new id.
    pub fn new(request: SubmitRequest, default_timeout_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec: request.spec,
            priority: request.priority,
            payload: request.payload,
            timeout_ms: request.timeout_ms.unwrap_or(default_timeout_ms),
            submitted_at: Utc::now(),
            finished_at: None,
            state: TaskState::Queued,
            assigned_vertex: None,
            results: Vec::new(),
            output: None,
            error: None,
            transitions: vec![TaskState::Queued],
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: TaskState) -> VertexResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(VertexError::Validation(format!(
                "task {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        self.state = next;
        self.transitions.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
            self.assigned_vertex = None;
        }
        Ok(())
    }

    /// Snapshot for callers.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            id: self.id,
            kind: self.spec.kind(),
            state: self.state,
            priority: self.priority,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
            assigned_vertex: self.assigned_vertex,
            results: self.results.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            transitions: self.transitions.clone(),
        }
    }
}

/// `GetStatus` response. Stable once the task is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task id.
    pub id: Uuid,
    /// Shape of the task.
    pub kind: TaskKind,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Scheduling priority.
    pub priority: Priority,
    /// Admission time.
    pub submitted_at: DateTime<Utc>,
    /// Set once terminal.
    pub finished_at: Option<DateTime<Utc>>,
    /// Vertex holding the task, if any.
    pub assigned_vertex: Option<usize>,
    /// Step records so far.
    pub results: Vec<StepResult>,
    /// Final output, when there is one.
    pub output: Option<Payload>,
    /// Cause of failure or cancellation.
    pub error: Option<ErrorReport>,
    /// Every state the task has been in, oldest first.
    pub transitions: Vec<TaskState>,
}

/// Result of a `CancelTask` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "state", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Was queued; removed and marked cancelled.
    Removed,
    /// Was assigned or running; cancellation has been signalled.
    Signalled,
    /// Already terminal; nothing to do.
    AlreadyFinished(TaskState),
}
