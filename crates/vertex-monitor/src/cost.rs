use crate::sample::RawUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const GB: f64 = 1_000_000_000.0;

/// Prices used to turn usage into a cost rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPrices {
    /// Per fully busy core per hour.
    #[serde(default = "default_cpu_core_hour")]
    pub cpu_core_hour: f64,
    #[serde(default = "default_memory_gb_hour")]
    pub memory_gb_hour: f64,
    /// Per GB transferred.
    #[serde(default = "default_network_gb")]
    pub network_gb: f64,
    /// Per GB written.
    #[serde(default = "default_storage_gb")]
    pub storage_gb: f64,
}

fn default_cpu_core_hour() -> f64 {
    0.048
}
fn default_memory_gb_hour() -> f64 {
    0.0053
}
fn default_network_gb() -> f64 {
    0.09
}
fn default_storage_gb() -> f64 {
    0.02
}

impl Default for UnitPrices {
    fn default() -> Self {
        Self {
            cpu_core_hour: default_cpu_core_hour(),
            memory_gb_hour: default_memory_gb_hour(),
            network_gb: default_network_gb(),
            storage_gb: default_storage_gb(),
        }
    }
}

impl UnitPrices {
    /// `Σ usage_i × unit_price_i`, expressed per hour.
    pub fn cost_per_hour(&self, usage: &RawUsage) -> f64 {
        let busy_cores = usage.cpu_percent / 100.0 * usage.cpu_cores;
        let memory_gb = usage.memory_used_bytes as f64 / GB;
        let network_gb_per_hour = usage.network_bytes_per_sec * 3600.0 / GB;
        let storage_gb_per_hour = usage.storage_bytes_per_sec * 3600.0 / GB;
        (busy_cores * self.cpu_core_hour
            + memory_gb * self.memory_gb_hour
            + network_gb_per_hour * self.network_gb
            + storage_gb_per_hour * self.storage_gb)
            .max(0.0)
    }
}

/// Total of a closed (or manually reset) billing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_cost: f64,
    pub samples: u64,
}

/// Integrates the cost rate over time within fixed-length billing windows.
///
/// The total only grows between resets. Each interval is charged at the
/// rate observed at its start.
#[derive(Debug, Clone)]
pub struct CostLedger {
    window: chrono::Duration,
    started_at: DateTime<Utc>,
    last_at: Option<DateTime<Utc>>,
    last_rate: f64,
    total: f64,
    samples: u64,
}

impl CostLedger {
    pub fn new(window: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            window,
            started_at: now,
            last_at: None,
            last_rate: 0.0,
            total: 0.0,
            samples: 0,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a new rate observation. Returns the summaries of every window
    /// that ended at or before `now`, oldest first. A gap spanning several
    /// windows closes each of them, charged at the last observed rate.
    pub fn accrue(&mut self, rate_per_hour: f64, now: DateTime<Utc>) -> Vec<WindowSummary> {
        let mut closed = Vec::new();
        if self.window > chrono::Duration::zero() {
            loop {
                let window_end = self.started_at + self.window;
                if now < window_end {
                    break;
                }
                self.charge_until(window_end);
                closed.push(self.close(window_end));
            }
        }
        self.charge_until(now);

        self.last_rate = rate_per_hour.max(0.0);
        self.last_at = Some(now);
        self.samples += 1;
        closed
    }

    /// Close the current window immediately.
    pub fn reset(&mut self, now: DateTime<Utc>) -> WindowSummary {
        self.charge_until(now);
        self.close(now)
    }

    fn charge_until(&mut self, until: DateTime<Utc>) {
        if let Some(last) = self.last_at {
            let elapsed = until - last;
            if elapsed > chrono::Duration::zero() {
                let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
                self.total += self.last_rate * hours;
                self.last_at = Some(until);
            }
        }
    }

    fn close(&mut self, at: DateTime<Utc>) -> WindowSummary {
        let summary = WindowSummary {
            started_at: self.started_at,
            ended_at: at,
            total_cost: self.total,
            samples: self.samples,
        };
        self.started_at = at;
        self.total = 0.0;
        self.samples = 0;
        summary
    }
}
