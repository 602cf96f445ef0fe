use serde::{Deserialize, Serialize};
use std::time::Duration;
use vertex_core::{VertexError, VertexResult};

/// Engine tunables. Every field has a serde default so a partial
/// `[orchestrator]` table is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Vertices created at startup.
    #[serde(default = "default_vertices")]
    pub vertices: usize,
    /// Maximum concurrent tasks per vertex.
    #[serde(default = "default_vertex_capacity")]
    pub vertex_capacity: usize,
    /// Applied when a submission carries no timeout. Bounds each chain step
    /// and each group branch.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
    /// How long a cancelled or timed-out routine may keep running before its
    /// slot is reclaimed by force.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Fallback scheduling period; scheduling is also triggered by events.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Terminal tasks are purged this long after finishing.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Longest accepted chain.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
    /// Most branches accepted in one group.
    #[serde(default = "default_max_group_width")]
    pub max_group_width: usize,
    /// Branches of one group that may execute at the same time.
    #[serde(default = "default_group_max_parallelism")]
    pub group_max_parallelism: usize,
    /// Smoothing factor for per-algorithm execution time averages.
    #[serde(default = "default_stats_alpha")]
    pub stats_alpha: f64,
}

fn default_vertices() -> usize {
    4
}
fn default_vertex_capacity() -> usize {
    2
}
fn default_task_timeout_ms() -> u64 {
    30_000
}
fn default_cancel_grace_ms() -> u64 {
    1_000
}
fn default_tick_ms() -> u64 {
    50
}
fn default_retention_secs() -> u64 {
    3_600
}
fn default_max_chain_depth() -> usize {
    16
}
fn default_max_group_width() -> usize {
    32
}
fn default_group_max_parallelism() -> usize {
    8
}
fn default_stats_alpha() -> f64 {
    0.3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            vertices: default_vertices(),
            vertex_capacity: default_vertex_capacity(),
            default_timeout_ms: default_task_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            tick_ms: default_tick_ms(),
            retention_secs: default_retention_secs(),
            max_chain_depth: default_max_chain_depth(),
            max_group_width: default_max_group_width(),
            group_max_parallelism: default_group_max_parallelism(),
            stats_alpha: default_stats_alpha(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> VertexResult<()> {
        if self.vertices == 0 {
            return Err(VertexError::Config("vertices must be at least 1".into()));
        }
        if self.vertex_capacity == 0 {
            return Err(VertexError::Config("vertex_capacity must be at least 1".into()));
        }
        if self.max_chain_depth == 0 || self.max_group_width == 0 {
            return Err(VertexError::Config(
                "max_chain_depth and max_group_width must be at least 1".into(),
            ));
        }
        if self.group_max_parallelism == 0 {
            return Err(VertexError::Config(
                "group_max_parallelism must be at least 1".into(),
            ));
        }
        if !(self.stats_alpha > 0.0 && self.stats_alpha <= 1.0) {
            return Err(VertexError::Config(format!(
                "stats_alpha must be in (0, 1], got {}",
                self.stats_alpha
            )));
        }
        Ok(())
    }

    /// Step timeout when a submission names none.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Wait for a cancelled routine before aborting it.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Scheduler period. Never zero.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// How long terminal tasks stay queryable.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_uses_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(r#"{"vertices": 2}"#)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.vertices, 2);
        assert_eq!(config.vertex_capacity, 2);
        assert_eq!(config.max_chain_depth, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_capacity() {
        let config = OrchestratorConfig {
            vertex_capacity: 0,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
