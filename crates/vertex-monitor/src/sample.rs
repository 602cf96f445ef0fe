use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Usage as reported by a sampler, before pricing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    pub cpu_percent: f64,
    /// Logical cores the CPU percentage refers to.
    pub cpu_cores: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub network_bytes_per_sec: f64,
    /// Storage write rate. [`SysinfoSampler`](crate::SysinfoSampler) derives it
    /// from the change in used disk space, so it is a net growth figure and
    /// not device I/O throughput.
    pub storage_bytes_per_sec: f64,
}

/// One monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub taken_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_bytes_per_sec: f64,
    pub storage_bytes_per_sec: f64,
    pub cost_per_hour: f64,
}

impl ResourceSample {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.taken_at
    }
}

/// Bounded rolling history; the oldest sample is dropped when full.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    capacity: usize,
    samples: VecDeque<ResourceSample>,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: ResourceSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&ResourceSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<ResourceSample> {
        self.samples.iter().cloned().collect()
    }
}
