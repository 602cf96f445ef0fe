//! Core types and error definitions for the vertex orchestration workspace.
//!
//! This crate provides the foundational types shared by the registry, the
//! resource monitor and the orchestration engine.
//!
//! # Main types
//!
//! - [`VertexError`] — Unified error enum covering the whole error taxonomy.
//! - [`VertexResult`] — Convenience alias for `Result<T, VertexError>`.
//! - [`ErrorReport`] — Serializable view of an error as returned by status queries.
//! - [`Payload`] — Opaque JSON value flowing into and out of algorithms.
//! - [`TypeTag`] — Declared input/output type of an algorithm.
//! - [`Priority`] — Task priority, 1 (highest) to 5 (lowest).
//! - [`CancelToken`] — Cooperative cancellation signal with parent/child scoping.

/// Cooperative cancellation tokens.
pub mod cancel;
/// Shared value types.
pub mod types;

pub use cancel::CancelToken;
pub use types::{Payload, Priority, TypeTag};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the orchestration core.
///
/// Errors are `Clone` because a single failed load is handed to every caller
/// waiting on it, and task errors are stored on the task for later queries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VertexError {
    /// A submission was malformed and rejected before enqueue.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An unknown algorithm id was referenced.
    #[error("Algorithm not found: {0}")]
    AlgorithmNotFound(String),

    /// Admission was throttled by the current budget tier.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A hard budget ceiling has been breached.
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// An algorithm implementation could not be materialized.
    #[error("Cache load error for '{algorithm}': {reason}")]
    CacheLoad {
        /// Algorithm that failed to load.
        algorithm: String,
        /// Loader-provided reason.
        reason: String,
    },

    /// An execution exceeded its timeout.
    #[error("Execution of '{algorithm}' timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        /// Algorithm that timed out.
        algorithm: String,
        /// Timeout that was enforced.
        timeout_ms: u64,
    },

    /// An algorithm raised an internal error while running.
    #[error("Execution of '{algorithm}' failed: {reason}")]
    ExecutionFailure {
        /// Algorithm that failed.
        algorithm: String,
        /// Failure reason reported by the algorithm.
        reason: String,
    },

    /// A chain step failed; later steps were not run.
    #[error("Chain aborted at step {step} ('{algorithm}'): {cause}")]
    ChainAborted {
        /// Zero-based index of the failing step.
        step: usize,
        /// Algorithm of the failing step.
        algorithm: String,
        /// Underlying step error.
        cause: Box<VertexError>,
    },

    /// Fewer group branches succeeded than the policy requires.
    #[error("Group partial failure: {succeeded} of {required} required branches succeeded")]
    GroupPartialFailure {
        /// Branches that produced a result.
        succeeded: usize,
        /// Minimum the aggregation policy required.
        required: usize,
    },

    /// Work was cancelled before it finished.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// No task with the given id is known (or it was purged).
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// An outbound HTTP error (alert delivery).
    #[error("HTTP error: {0}")]
    Http(String),
}

impl VertexError {
    /// Stable taxonomy name of this error, as exposed to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            VertexError::Validation(_) => "ValidationError",
            VertexError::AlgorithmNotFound(_) => "AlgorithmNotFoundError",
            VertexError::ResourceExhausted(_) => "ResourceExhaustedError",
            VertexError::BudgetExceeded(_) => "BudgetExceededError",
            VertexError::CacheLoad { .. } => "CacheLoadError",
            VertexError::ExecutionTimeout { .. } => "ExecutionTimeoutError",
            VertexError::ExecutionFailure { .. } => "ExecutionFailure",
            VertexError::ChainAborted { .. } => "ChainAbortedError",
            VertexError::GroupPartialFailure { .. } => "GroupPartialFailure",
            VertexError::Cancelled(_) => "Cancelled",
            VertexError::TaskNotFound(_) => "TaskNotFound",
            VertexError::Config(_) => "ConfigError",
            VertexError::Io(_) => "IoError",
            VertexError::Json(_) => "JsonError",
            VertexError::Http(_) => "HttpError",
        }
    }

    /// Shorthand for an [`VertexError::ExecutionFailure`].
    pub fn execution(algorithm: impl Into<String>, reason: impl Into<String>) -> Self {
        VertexError::ExecutionFailure {
            algorithm: algorithm.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for VertexError {
    fn from(e: std::io::Error) -> Self {
        VertexError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for VertexError {
    fn from(e: serde_json::Error) -> Self {
        VertexError::Json(e.to_string())
    }
}

/// A convenience `Result` alias using [`VertexError`].
pub type VertexResult<T> = Result<T, VertexError>;

/// Serializable form of a [`VertexError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Taxonomy name, see [`VertexError::kind`].
    pub kind: String,
    /// Human readable message.
    pub message: String,
}

impl From<&VertexError> for ErrorReport {
    fn from(e: &VertexError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
