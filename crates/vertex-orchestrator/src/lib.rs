//! Vertex orchestration engine.
//!
//! Owns a pool of vertices (bounded concurrent execution slots) and a
//! priority queue of tasks. A task is a single algorithm, a chain whose steps
//! feed each other, or a group run concurrently against one input. The engine
//! consults the [`AlgorithmRegistry`](vertex_registry::AlgorithmRegistry) to
//! make implementations resident and the resource monitor to admit work.
//!
//! # Main types
//!
//! - [`Orchestrator`] — `submit`, `status`, `cancel`, `metrics`, `resize_pool`.
//! - [`TaskSpec`] — Single, chain or group task shape.
//! - [`TaskState`] — `Queued → Assigned → Running → terminal` lifecycle.
//! - [`VertexPool`] — Predicted-finish-time placement across vertices.
//! - [`AuditLog`] — Append-only JSON-lines task history.

#![deny(missing_docs)]

/// Submission validation and budget gating.
pub mod admission;
/// Task audit history.
pub mod audit;
/// Engine configuration.
pub mod config;
/// The scheduler, vertex workers and public facade.
pub mod engine;
/// Single, chain and group execution.
pub mod executor;
/// Pull-based metrics surface.
pub mod metrics;
/// Retained task records.
pub mod store;
/// Priority queue of pending tasks.
pub mod task_queue;
/// Task specs, states and results.
pub mod types;
/// Vertices and placement.
pub mod vertex;

pub use audit::{AuditAction, AuditConfig, AuditEntry, AuditLog};
pub use config::OrchestratorConfig;
pub use engine::{ForceReduceReport, Orchestrator, OrchestratorBuilder};
pub use executor::{Execution, Executor};
pub use metrics::{AlgorithmMetrics, MetricsSnapshot, TaskCounters};
pub use store::TaskTable;
pub use task_queue::TaskQueue;
pub use types::{
    CancelOutcome, GroupPolicy, StepOutcome, StepResult, SubmitRequest, Task, TaskKind, TaskSpec,
    TaskState, TaskStatus,
};
pub use vertex::{AlgorithmStats, ResizeReport, VertexPool, VertexSnapshot};
