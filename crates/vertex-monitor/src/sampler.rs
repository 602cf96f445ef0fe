use crate::sample::RawUsage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Disks, Networks, System};
use vertex_core::{VertexError, VertexResult};

/// Source of raw usage figures, polled once per monitor tick.
///
/// `sample` runs on the blocking thread pool and may perform synchronous I/O.
pub trait ResourceSampler: Send + 'static {
    fn sample(&mut self) -> VertexResult<RawUsage>;
}

/// Host-wide usage read through `sysinfo`.
///
/// Network and storage rates are deltas between consecutive calls, so the
/// first call reports zero for both. The storage rate is the absolute change
/// in used space across all mounted disks per second; reads and writes that
/// do not change occupancy are invisible to it.
pub struct SysinfoSampler {
    system: System,
    last: Option<Counters>,
}

struct Counters {
    at: Instant,
    network_bytes: u64,
    disk_used_bytes: u64,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system, last: None }
    }

    fn counters() -> Counters {
        let networks = Networks::new_with_refreshed_list();
        let network_bytes = networks
            .iter()
            .map(|(_, data)| data.total_received() + data.total_transmitted())
            .sum();
        let disks = Disks::new_with_refreshed_list();
        let disk_used_bytes = disks
            .iter()
            .map(|d| d.total_space().saturating_sub(d.available_space()))
            .sum();
        Counters {
            at: Instant::now(),
            network_bytes,
            disk_used_bytes,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> VertexResult<RawUsage> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(VertexError::Io("host reported zero total memory".into()));
        }
        let used_memory = self.system.used_memory();
        let cpu_cores = self.system.cpus().len().max(1) as f64;

        let now = Self::counters();
        let (network_rate, disk_usage_delta_rate) = match &self.last {
            Some(prev) => {
                let secs = now.at.duration_since(prev.at).as_secs_f64().max(1e-3);
                (
                    now.network_bytes.saturating_sub(prev.network_bytes) as f64 / secs,
                    now.disk_used_bytes.abs_diff(prev.disk_used_bytes) as f64 / secs,
                )
            }
            None => (0.0, 0.0),
        };
        self.last = Some(now);

        Ok(RawUsage {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            cpu_cores,
            memory_percent: used_memory as f64 / total_memory as f64 * 100.0,
            memory_used_bytes: used_memory,
            network_bytes_per_sec: network_rate,
            storage_bytes_per_sec: disk_usage_delta_rate,
        })
    }
}

/// Sampler whose readings are set by hand; clones share the same reading.
///
/// Used for simulation and tests. Setting a failure makes the next ticks
/// report a missed sample.
#[derive(Clone)]
pub struct ManualSampler {
    reading: Arc<Mutex<Result<RawUsage, String>>>,
}

impl ManualSampler {
    pub fn new(initial: RawUsage) -> Self {
        Self {
            reading: Arc::new(Mutex::new(Ok(initial))),
        }
    }

    pub fn set(&self, usage: RawUsage) {
        *self.reading.lock() = Ok(usage);
    }

    /// Convenience for setting only the memory percentage.
    pub fn set_memory_percent(&self, percent: f64) {
        let mut reading = self.reading.lock();
        let mut usage = reading.clone().unwrap_or_default();
        usage.memory_percent = percent;
        *reading = Ok(usage);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        *self.reading.lock() = Err(reason.into());
    }
}

impl ResourceSampler for ManualSampler {
    fn sample(&mut self) -> VertexResult<RawUsage> {
        self.reading.lock().clone().map_err(VertexError::Io)
    }
}
