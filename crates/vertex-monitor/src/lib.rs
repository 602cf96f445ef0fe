//! Resource and cost monitor.
//!
//! An independent periodic actor samples compute, memory, network and storage
//! usage, derives a cost rate, integrates it over a billing window and maps
//! utilization onto admission tiers (normal, warn, throttle, force-reduce).
//! Consumers read the latest state through a [`MonitorHandle`] and receive
//! [`MonitorEvent`]s over a channel; the monitor never shares a lock with
//! the scheduler.
//!
//! # Main types
//!
//! - [`ResourceMonitor`] — Spawns the sampling loop.
//! - [`MonitorHandle`] — `current()`, `budget_status()`, history and billing reset.
//! - [`BudgetStatus`] — Per-dimension ratios, crossed thresholds, staleness.
//! - [`CostLedger`] — Running cost total per billing window.
//! - [`AlertSink`] — Destination for threshold-crossing notifications.

/// Threshold-crossing notification sinks.
pub mod alerts;
/// Budget ceilings, thresholds and status evaluation.
pub mod budget;
/// Unit prices and billing window integration.
pub mod cost;
/// The periodic sampling actor and its handle.
pub mod monitor;
/// Samples and the rolling history buffer.
pub mod sample;
/// Usage sources.
pub mod sampler;

pub use alerts::{AlertSink, LogAlertSink, ThresholdAlert, WebhookAlertSink, WebhookSinkConfig};
pub use budget::{BudgetConfig, BudgetStatus, DimensionRatios, ThresholdTier, Thresholds};
pub use cost::{CostLedger, UnitPrices, WindowSummary};
pub use monitor::{MonitorConfig, MonitorEvent, MonitorHandle, ResourceMonitor};
pub use sample::{RawUsage, ResourceSample, SampleHistory};
pub use sampler::{ManualSampler, ResourceSampler, SysinfoSampler};
