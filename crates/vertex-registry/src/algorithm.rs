use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vertex_core::{CancelToken, Payload, TypeTag, VertexError, VertexResult};

/// Broad family an algorithm belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmCategory {
    Predictive,
    Learning,
    Causal,
    Recursive,
    Optimization,
    PatternRecognition,
    DecisionMaking,
    MemoryManagement,
}

impl std::fmt::Display for AlgorithmCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlgorithmCategory::Predictive => "predictive",
            AlgorithmCategory::Learning => "learning",
            AlgorithmCategory::Causal => "causal",
            AlgorithmCategory::Recursive => "recursive",
            AlgorithmCategory::Optimization => "optimization",
            AlgorithmCategory::PatternRecognition => "pattern_recognition",
            AlgorithmCategory::DecisionMaking => "decision_making",
            AlgorithmCategory::MemoryManagement => "memory_management",
        };
        f.write_str(name)
    }
}

/// Estimated resources an algorithm holds while resident and running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpu_cores: f64,
    /// Resident size of the loaded implementation; counted against tier capacity.
    pub memory_bytes: u64,
}

impl Default for ResourceEstimate {
    fn default() -> Self {
        Self {
            cpu_cores: 0.1,
            memory_bytes: 1024 * 1024,
        }
    }
}

/// Immutable metadata describing an algorithm's identity and cost profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    pub id: String,
    pub category: AlgorithmCategory,
    pub input: TypeTag,
    pub output: TypeTag,
    pub estimated_cost: ResourceEstimate,
    pub estimated_execution_ms: u64,
    #[serde(default = "default_version")]
    pub version: String,
    /// Equal inputs always yield equal outputs, so results may be memoized.
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_deterministic() -> bool {
    true
}

impl AlgorithmDescriptor {
    pub fn new(
        id: impl Into<String>,
        category: AlgorithmCategory,
        input: impl Into<TypeTag>,
        output: impl Into<TypeTag>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            input: input.into(),
            output: output.into(),
            estimated_cost: ResourceEstimate::default(),
            estimated_execution_ms: 10,
            version: default_version(),
            deterministic: default_deterministic(),
        }
    }

    pub fn with_cost(mut self, cpu_cores: f64, memory_bytes: u64) -> Self {
        self.estimated_cost = ResourceEstimate {
            cpu_cores,
            memory_bytes,
        };
        self
    }

    pub fn with_execution_ms(mut self, ms: u64) -> Self {
        self.estimated_execution_ms = ms;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Exclude this algorithm from result memoization.
    pub fn nondeterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub fn resident_bytes(&self) -> u64 {
        self.estimated_cost.memory_bytes
    }

    pub fn estimated_execution(&self) -> Duration {
        Duration::from_millis(self.estimated_execution_ms)
    }
}

/// Per-invocation context handed to an [`Executable`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub step: usize,
    /// Routines are expected to poll this and return early once it fires.
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(task_id: Uuid, step: usize, cancel: CancelToken) -> Self {
        Self {
            task_id,
            step,
            cancel,
        }
    }

    /// Context not bound to any task; used by tools and tests.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), 0, CancelToken::new())
    }

    /// Return `Err(Cancelled)` if cancellation was requested.
    pub fn check_cancelled(&self, algorithm: &str) -> VertexResult<()> {
        if self.cancel.is_cancelled() {
            Err(VertexError::Cancelled(format!(
                "'{algorithm}' observed cancellation"
            )))
        } else {
            Ok(())
        }
    }
}

/// Capability every algorithm implementation provides.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload>;
}

/// Materializes an algorithm implementation on a cache miss.
#[async_trait]
pub trait AlgorithmLoader: Send + Sync {
    async fn load(&self, descriptor: &AlgorithmDescriptor) -> VertexResult<Arc<dyn Executable>>;
}

/// Loader backed by a synchronous factory closure.
pub struct FactoryLoader<F> {
    factory: F,
}

impl<F> FactoryLoader<F>
where
    F: Fn() -> VertexResult<Arc<dyn Executable>> + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> AlgorithmLoader for FactoryLoader<F>
where
    F: Fn() -> VertexResult<Arc<dyn Executable>> + Send + Sync,
{
    async fn load(&self, _descriptor: &AlgorithmDescriptor) -> VertexResult<Arc<dyn Executable>> {
        (self.factory)()
    }
}
