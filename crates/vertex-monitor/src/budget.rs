use crate::sample::ResourceSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vertex_core::{VertexError, VertexResult};

/// Admission tier derived from the highest utilization ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdTier {
    Normal,
    /// Logged only.
    Warn,
    /// Non-critical priorities are rejected at admission.
    Throttle,
    /// Cold cache entries are shed and queued low-priority work is dropped.
    ForceReduce,
}

impl std::fmt::Display for ThresholdTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdTier::Normal => write!(f, "normal"),
            ThresholdTier::Warn => write!(f, "warn"),
            ThresholdTier::Throttle => write!(f, "throttle"),
            ThresholdTier::ForceReduce => write!(f, "force_reduce"),
        }
    }
}

/// Utilization ratios at which each tier begins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_warn")]
    pub warn: f64,
    #[serde(default = "default_throttle")]
    pub throttle: f64,
    #[serde(default = "default_force_reduce")]
    pub force_reduce: f64,
}

fn default_warn() -> f64 {
    0.75
}
fn default_throttle() -> f64 {
    0.90
}
fn default_force_reduce() -> f64 {
    0.95
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: default_warn(),
            throttle: default_throttle(),
            force_reduce: default_force_reduce(),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> VertexResult<()> {
        if !(0.0 < self.warn && self.warn <= self.throttle && self.throttle <= self.force_reduce) {
            return Err(VertexError::Config(format!(
                "thresholds must satisfy 0 < warn <= throttle <= force_reduce (got {} / {} / {})",
                self.warn, self.throttle, self.force_reduce
            )));
        }
        Ok(())
    }

    pub fn tier_for(&self, ratio: f64) -> ThresholdTier {
        if ratio >= self.force_reduce {
            ThresholdTier::ForceReduce
        } else if ratio >= self.throttle {
            ThresholdTier::Throttle
        } else if ratio >= self.warn {
            ThresholdTier::Warn
        } else {
            ThresholdTier::Normal
        }
    }
}

/// Ceilings per resource dimension, plus an optional hard cost ceiling per
/// billing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,
    #[serde(default = "default_max_network")]
    pub max_network_bytes_per_sec: f64,
    #[serde(default = "default_max_storage")]
    pub max_storage_bytes_per_sec: f64,
    #[serde(default = "default_max_cost_per_hour")]
    pub max_cost_per_hour: f64,
    #[serde(default)]
    pub max_cost_per_window: Option<f64>,
}

fn default_max_cpu_percent() -> f64 {
    100.0
}
fn default_max_memory_percent() -> f64 {
    100.0
}
fn default_max_network() -> f64 {
    125_000_000.0
}
fn default_max_storage() -> f64 {
    500_000_000.0
}
fn default_max_cost_per_hour() -> f64 {
    5.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_max_cpu_percent(),
            max_memory_percent: default_max_memory_percent(),
            max_network_bytes_per_sec: default_max_network(),
            max_storage_bytes_per_sec: default_max_storage(),
            max_cost_per_hour: default_max_cost_per_hour(),
            max_cost_per_window: None,
        }
    }
}

fn ratio(value: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        0.0
    } else {
        (value / ceiling).max(0.0)
    }
}

/// Utilization as a fraction of each configured ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionRatios {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub storage: f64,
    pub cost: f64,
}

impl DimensionRatios {
    pub fn of(sample: &ResourceSample, budget: &BudgetConfig) -> Self {
        Self {
            cpu: ratio(sample.cpu_percent, budget.max_cpu_percent),
            memory: ratio(sample.memory_percent, budget.max_memory_percent),
            network: ratio(sample.network_bytes_per_sec, budget.max_network_bytes_per_sec),
            storage: ratio(sample.storage_bytes_per_sec, budget.max_storage_bytes_per_sec),
            cost: ratio(sample.cost_per_hour, budget.max_cost_per_hour),
        }
    }

    pub fn max(&self) -> f64 {
        [self.cpu, self.memory, self.network, self.storage, self.cost]
            .into_iter()
            .fold(0.0, f64::max)
    }
}

/// Budget evaluation handed to admission control and the metrics surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub ratios: DimensionRatios,
    pub tier: ThresholdTier,
    /// Every non-normal tier at or below `tier`.
    pub crossed: Vec<ThresholdTier>,
    pub window_cost: f64,
    /// The billing-window cost ceiling has been reached.
    pub ceiling_breached: bool,
    /// No fresh sample; `tier` is the last known tier.
    pub stale: bool,
    pub sampled_at: Option<DateTime<Utc>>,
}

impl BudgetStatus {
    /// Status before the first sample: normal, but flagged stale.
    pub fn initial() -> Self {
        Self {
            ratios: DimensionRatios::default(),
            tier: ThresholdTier::Normal,
            crossed: Vec::new(),
            window_cost: 0.0,
            ceiling_breached: false,
            stale: true,
            sampled_at: None,
        }
    }

    pub fn evaluate(
        sample: &ResourceSample,
        budget: &BudgetConfig,
        thresholds: &Thresholds,
        window_cost: f64,
    ) -> Self {
        let ratios = DimensionRatios::of(sample, budget);
        let tier = thresholds.tier_for(ratios.max());
        Self {
            ratios,
            tier,
            crossed: crossed_up_to(tier),
            window_cost,
            ceiling_breached: budget
                .max_cost_per_window
                .is_some_and(|ceiling| window_cost >= ceiling),
            stale: false,
            sampled_at: Some(sample.taken_at),
        }
    }

    /// Mark as stale while keeping the last-known tier.
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

fn crossed_up_to(tier: ThresholdTier) -> Vec<ThresholdTier> {
    [
        ThresholdTier::Warn,
        ThresholdTier::Throttle,
        ThresholdTier::ForceReduce,
    ]
    .into_iter()
    .filter(|t| *t <= tier)
    .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample(memory_percent: f64) -> ResourceSample {
        ResourceSample {
            taken_at: Utc::now(),
            cpu_percent: 10.0,
            memory_percent,
            network_bytes_per_sec: 0.0,
            storage_bytes_per_sec: 0.0,
            cost_per_hour: 0.1,
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.tier_for(0.5), ThresholdTier::Normal);
        assert_eq!(t.tier_for(0.75), ThresholdTier::Warn);
        assert_eq!(t.tier_for(0.9), ThresholdTier::Throttle);
        assert_eq!(t.tier_for(0.96), ThresholdTier::ForceReduce);
    }

    #[test]
    fn test_memory_drives_tier() {
        let status = BudgetStatus::evaluate(
            &sample(96.0),
            &BudgetConfig::default(),
            &Thresholds::default(),
            0.0,
        );
        assert_eq!(status.tier, ThresholdTier::ForceReduce);
        assert_eq!(
            status.crossed,
            vec![
                ThresholdTier::Warn,
                ThresholdTier::Throttle,
                ThresholdTier::ForceReduce
            ]
        );
        assert!(!status.stale);
    }

    #[test]
    fn test_window_ceiling() {
        let budget = BudgetConfig {
            max_cost_per_window: Some(2.0),
            ..BudgetConfig::default()
        };
        let status = BudgetStatus::evaluate(&sample(10.0), &budget, &Thresholds::default(), 2.5);
        assert!(status.ceiling_breached);
        assert_eq!(status.tier, ThresholdTier::Normal);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::default().validate().is_ok());
        let bad = Thresholds {
            warn: 0.9,
            throttle: 0.8,
            force_reduce: 0.95,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_stale_keeps_tier() {
        let status = BudgetStatus::evaluate(
            &sample(92.0),
            &BudgetConfig::default(),
            &Thresholds::default(),
            0.0,
        )
        .into_stale();
        assert!(status.stale);
        assert_eq!(status.tier, ThresholdTier::Throttle);
    }
}
