use crate::registry::AlgorithmRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vertex_core::CancelToken;

struct AccessHistory {
    last: Instant,
    /// Smoothed inter-access interval in seconds; `None` until two accesses.
    interval_secs: Option<f64>,
}

/// Exponential moving average of the interval between accesses, per id.
pub struct AccessPredictor {
    alpha: f64,
    history: HashMap<String, AccessHistory>,
}

impl AccessPredictor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            history: HashMap::new(),
        }
    }

    pub fn record(&mut self, id: &str, now: Instant) {
        match self.history.get_mut(id) {
            Some(h) => {
                let gap = now.saturating_duration_since(h.last).as_secs_f64();
                h.interval_secs = Some(match h.interval_secs {
                    Some(prev) => self.alpha * gap + (1.0 - self.alpha) * prev,
                    None => gap,
                });
                h.last = now;
            }
            None => {
                self.history.insert(
                    id.to_string(),
                    AccessHistory {
                        last: now,
                        interval_secs: None,
                    },
                );
            }
        }
    }

    pub fn predicted_next(&self, id: &str) -> Option<Instant> {
        let h = self.history.get(id)?;
        let interval = h.interval_secs?;
        Some(h.last + Duration::from_secs_f64(interval))
    }

    /// Ids whose predicted next access lies within `lookahead` of `now`,
    /// ignoring predictions that went stale more than `lookahead` ago.
    /// Sorted by predicted time.
    pub fn due(&self, now: Instant, lookahead: Duration) -> Vec<String> {
        let mut due: Vec<(Instant, &String)> = self
            .history
            .keys()
            .filter_map(|id| self.predicted_next(id).map(|t| (t, id)))
            .filter(|(t, _)| *t <= now + lookahead && *t + lookahead >= now)
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }
}

/// Background preloading and cache maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_lookahead_ms")]
    pub lookahead_ms: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    1_000
}
fn default_lookahead_ms() -> u64 {
    5_000
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
            lookahead_ms: default_lookahead_ms(),
        }
    }
}

/// Periodic actor that demotes idle cache entries and, when the budget has
/// headroom, loads algorithms shortly before their predicted next use.
pub struct Preloader;

impl Preloader {
    pub fn spawn<H>(
        registry: AlgorithmRegistry,
        config: PreloadConfig,
        has_headroom: H,
        shutdown: CancelToken,
    ) -> JoinHandle<()>
    where
        H: Fn() -> bool + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let lookahead = Duration::from_millis(config.lookahead_ms);
            let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms.max(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(enabled = config.enabled, interval_ms = config.interval_ms, "Cache preloader started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let demoted = registry.maintain();
                if demoted > 0 {
                    debug!(demoted, "Cache maintenance pass");
                }
                if !config.enabled || !has_headroom() {
                    continue;
                }
                for id in registry.due_for_preload(lookahead) {
                    match registry.preload(&id).await {
                        Ok(()) => debug!(algorithm = %id, "Preloaded algorithm"),
                        Err(e) => warn!(algorithm = %id, error = %e, "Preload failed"),
                    }
                }
            }
            info!("Cache preloader stopped");
        })
    }
}
