use crate::alerts::{AlertSink, ThresholdAlert};
use crate::budget::{BudgetConfig, BudgetStatus, ThresholdTier, Thresholds};
use crate::cost::{CostLedger, UnitPrices, WindowSummary};
use crate::sample::{RawUsage, ResourceSample, SampleHistory};
use crate::sampler::ResourceSampler;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vertex_core::{CancelToken, VertexError, VertexResult};

/// Monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Samples kept in the rolling history.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_billing_window_secs")]
    pub billing_window_secs: u64,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub prices: UnitPrices,
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_interval_ms() -> u64 {
    5_000
}
fn default_history_len() -> usize {
    720
}
fn default_billing_window_secs() -> u64 {
    3_600
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            history_len: default_history_len(),
            billing_window_secs: default_billing_window_secs(),
            budget: BudgetConfig::default(),
            prices: UnitPrices::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Messages from the monitor to its consumer, in tick order.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Sample(ResourceSample),
    TierChanged {
        from: ThresholdTier,
        to: ThresholdTier,
        status: BudgetStatus,
    },
    SampleMissed {
        reason: String,
        consecutive: u32,
    },
    WindowClosed(WindowSummary),
}

#[derive(Debug, Clone)]
struct Published {
    latest: Option<ResourceSample>,
    status: BudgetStatus,
    /// Monotonic time of the last successful sample, used for staleness.
    fresh_at: Option<Instant>,
}

enum Command {
    ResetBilling(oneshot::Sender<WindowSummary>),
}

/// Read side of a running monitor. Cheap to clone.
#[derive(Clone)]
pub struct MonitorHandle {
    state: watch::Receiver<Published>,
    history: Arc<Mutex<SampleHistory>>,
    commands: mpsc::Sender<Command>,
    interval: Duration,
}

impl MonitorHandle {
    /// Latest successful sample.
    pub fn current(&self) -> Option<ResourceSample> {
        self.state.borrow().latest.clone()
    }

    /// Budget evaluation of the latest sample. A sample older than twice the
    /// sampling interval is reported as stale with its last-known tier.
    pub fn budget_status(&self) -> BudgetStatus {
        let (status, fresh_at) = {
            let published = self.state.borrow();
            (published.status.clone(), published.fresh_at)
        };
        match fresh_at {
            Some(at) if at.elapsed() <= self.interval * 2 => status,
            _ => status.into_stale(),
        }
    }

    /// Rolling history, oldest first.
    pub fn history(&self) -> Vec<ResourceSample> {
        self.history.lock().to_vec()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Close the current billing window now and start a new one.
    pub async fn reset_billing_window(&self) -> VertexResult<WindowSummary> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ResetBilling(tx))
            .await
            .map_err(|_| VertexError::Config("resource monitor is not running".into()))?;
        rx.await
            .map_err(|_| VertexError::Config("resource monitor stopped".into()))
    }
}

/// Periodic sampling actor.
pub struct ResourceMonitor {
    config: MonitorConfig,
    /// Shared with the blocking pool, where each reading is taken.
    sampler: Arc<Mutex<Box<dyn ResourceSampler>>>,
    ledger: CostLedger,
    history: Arc<Mutex<SampleHistory>>,
    state: watch::Sender<Published>,
    events: mpsc::Sender<MonitorEvent>,
    sinks: Vec<Arc<dyn AlertSink>>,
    last_tier: ThresholdTier,
    last_status: BudgetStatus,
    missed: u32,
}

impl ResourceMonitor {
    /// Start sampling on a background task. Returns the read handle and the
    /// event stream. The loop runs until `shutdown` fires.
    pub fn spawn<S>(
        config: MonitorConfig,
        sampler: S,
        sinks: Vec<Arc<dyn AlertSink>>,
        shutdown: CancelToken,
    ) -> VertexResult<(MonitorHandle, mpsc::Receiver<MonitorEvent>)>
    where
        S: ResourceSampler,
    {
        config.thresholds.validate()?;
        let window_secs = i64::try_from(config.billing_window_secs.max(1))
            .map_err(|_| VertexError::Config("billing window too long".into()))?;

        let (state_tx, state_rx) = watch::channel(Published {
            latest: None,
            status: BudgetStatus::initial(),
            fresh_at: None,
        });
        let (events_tx, events_rx) = mpsc::channel(256);
        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let history = Arc::new(Mutex::new(SampleHistory::new(config.history_len)));
        let interval = config.interval();

        let handle = MonitorHandle {
            state: state_rx,
            history: history.clone(),
            commands: commands_tx,
            interval,
        };

        let mut actor = ResourceMonitor {
            ledger: CostLedger::new(chrono::Duration::seconds(window_secs), Utc::now()),
            config,
            sampler: Arc::new(Mutex::new(Box::new(sampler))),
            history,
            state: state_tx,
            events: events_tx,
            sinks,
            last_tier: ThresholdTier::Normal,
            last_status: BudgetStatus::initial(),
            missed: 0,
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_ms = interval.as_millis() as u64, "Resource monitor started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => actor.tick().await,
                    Some(command) = commands_rx.recv() => actor.handle(command),
                }
            }
            info!("Resource monitor stopped");
        });

        Ok((handle, events_rx))
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ResetBilling(reply) => {
                let summary = self.ledger.reset(Utc::now());
                info!(total_cost = summary.total_cost, "Billing window reset");
                let _ = reply.send(summary);
            }
        }
    }

    /// Take one reading off the async workers; sysinfo refreshes block on
    /// procfs and filesystem calls.
    async fn read_sampler(&self) -> VertexResult<RawUsage> {
        let sampler = Arc::clone(&self.sampler);
        tokio::task::spawn_blocking(move || sampler.lock().sample())
            .await
            .map_err(|e| VertexError::Io(format!("sampler task failed: {e}")))?
    }

    async fn tick(&mut self) {
        let raw = self.read_sampler().await;
        let now = Utc::now();
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.missed += 1;
                warn!(error = %e, consecutive = self.missed, "Resource sample missed");
                let stale = self.last_status.clone().into_stale();
                self.state.send_modify(|p| p.status = stale);
                self.emit(MonitorEvent::SampleMissed {
                    reason: e.to_string(),
                    consecutive: self.missed,
                });
                return;
            }
        };
        self.missed = 0;

        let sample = ResourceSample {
            taken_at: now,
            cpu_percent: raw.cpu_percent,
            memory_percent: raw.memory_percent,
            network_bytes_per_sec: raw.network_bytes_per_sec,
            storage_bytes_per_sec: raw.storage_bytes_per_sec,
            cost_per_hour: self.config.prices.cost_per_hour(&raw),
        };
        let closed = self.ledger.accrue(sample.cost_per_hour, now);
        self.history.lock().push(sample.clone());

        let status = BudgetStatus::evaluate(
            &sample,
            &self.config.budget,
            &self.config.thresholds,
            self.ledger.total(),
        );
        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            cost_per_hour = sample.cost_per_hour,
            tier = %status.tier,
            "Resource sample"
        );
        self.state.send_replace(Published {
            latest: Some(sample.clone()),
            status: status.clone(),
            fresh_at: Some(Instant::now()),
        });
        self.last_status = status.clone();
        self.emit(MonitorEvent::Sample(sample));

        for summary in closed {
            info!(
                total_cost = summary.total_cost,
                samples = summary.samples,
                "Billing window closed"
            );
            self.emit(MonitorEvent::WindowClosed(summary));
        }

        if status.tier != self.last_tier {
            let from = self.last_tier;
            self.last_tier = status.tier;
            if status.tier == ThresholdTier::Warn && from < status.tier {
                warn!(max_ratio = status.ratios.max(), "Resource usage above warn threshold");
            }
            self.dispatch_alert(ThresholdAlert {
                from,
                to: status.tier,
                status: status.clone(),
                at: now,
            });
            // Tier changes must not be dropped.
            if self
                .events
                .send(MonitorEvent::TierChanged {
                    from,
                    to: status.tier,
                    status,
                })
                .await
                .is_err()
            {
                debug!("Monitor event receiver dropped");
            }
        }
    }

    fn emit(&self, event: MonitorEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            debug!("Monitor event channel full; dropping event");
        }
    }

    /// Deliver to every sink on its own task so slow endpoints never delay sampling.
    fn dispatch_alert(&self, alert: ThresholdAlert) {
        for sink in &self.sinks {
            let sink = sink.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.notify(&alert).await {
                    warn!(sink = sink.name(), error = %e, "Alert delivery failed");
                }
            });
        }
    }
}
