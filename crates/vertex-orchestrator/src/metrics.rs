use crate::types::TaskState;
use crate::vertex::{AlgorithmStats, VertexSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vertex_monitor::BudgetStatus;
use vertex_registry::{CacheStats, EntrySnapshot};

/// Lifetime task tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    /// Admitted submissions.
    pub submitted: u64,
    /// Refused submissions.
    pub rejected: u64,
    /// Tasks that ended Completed.
    pub completed: u64,
    /// Tasks that ended Failed.
    pub failed: u64,
    /// Groups that ended PartialSuccess.
    pub partial_success: u64,
    /// Tasks that ended Cancelled, shed ones included.
    pub cancelled: u64,
    /// Queued tasks dropped by a force-reduce.
    pub shed: u64,
}

impl TaskCounters {
    /// Count one terminal transition. Non-terminal states are ignored.
    pub fn record_terminal(&mut self, state: TaskState) {
        match state {
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::PartialSuccess => self.partial_success += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Queued | TaskState::Assigned | TaskState::Running => {}
        }
    }
}

/// Per-algorithm figures aggregated over every vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmMetrics {
    /// Executions across the pool.
    pub runs: u64,
    /// Smoothed execution time.
    pub avg_execution_ms: f64,
    /// Successes over runs.
    pub success_rate: f64,
}

impl From<&AlgorithmStats> for AlgorithmMetrics {
    fn from(stats: &AlgorithmStats) -> Self {
        Self {
            runs: stats.runs,
            avg_execution_ms: stats.avg_execution_ms,
            success_rate: stats.success_rate(),
        }
    }
}

/// Pull-based metrics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Capture time.
    pub taken_at: DateTime<Utc>,
    /// Tasks waiting for a vertex.
    pub queue_depth: usize,
    /// Queued tasks per priority, index 0 is priority 1.
    pub queue_by_priority: [usize; 5],
    /// Tasks assigned or running.
    pub running: usize,
    /// Tasks still queryable, terminal ones included.
    pub retained_tasks: usize,
    /// Lifetime tallies.
    pub tasks: TaskCounters,
    /// Per-vertex load and history.
    pub vertices: Vec<VertexSnapshot>,
    /// Registry cache counters.
    pub cache: CacheStats,
    /// Resident algorithms.
    pub cache_entries: Vec<EntrySnapshot>,
    /// Absent when the engine runs without a resource monitor.
    pub budget: Option<BudgetStatus>,
    /// Latest sampled cost rate.
    pub cost_per_hour: Option<f64>,
    /// Per-algorithm figures.
    pub algorithms: BTreeMap<String, AlgorithmMetrics>,
}
