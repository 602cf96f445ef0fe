use crate::algorithm::Executable;
use crate::memo::MemoStats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use vertex_core::{VertexError, VertexResult};

/// Residency class of a loaded algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    pub fn hotter(self) -> Option<Tier> {
        match self {
            Tier::Hot => None,
            Tier::Warm => Some(Tier::Hot),
            Tier::Cold => Some(Tier::Warm),
        }
    }

    pub fn colder(self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Warm => write!(f, "warm"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

/// A counter kept separately for each tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub hot: u64,
    pub warm: u64,
    pub cold: u64,
}

impl TierCounts {
    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Hot => self.hot,
            Tier::Warm => self.warm,
            Tier::Cold => self.cold,
        }
    }

    fn slot(&mut self, tier: Tier) -> &mut u64 {
        match tier {
            Tier::Hot => &mut self.hot,
            Tier::Warm => &mut self.warm,
            Tier::Cold => &mut self.cold,
        }
    }

    fn add(&mut self, tier: Tier, n: u64) {
        *self.slot(tier) += n;
    }

    fn sub(&mut self, tier: Tier, n: u64) {
        let slot = self.slot(tier);
        *slot = slot.saturating_sub(n);
    }

    pub fn total(&self) -> u64 {
        self.hot + self.warm + self.cold
    }
}

/// Cache counters exposed on the metrics surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: TierCounts,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: TierCounts,
    pub promotions: u64,
    pub demotions: u64,
    pub resident_bytes: TierCounts,
    pub entries: TierCounts,
    /// Filled in by the registry, which owns the memo.
    #[serde(default)]
    pub memo: MemoStats,
}

/// Capacities and scoring parameters of the tiered cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity_bytes: u64,
    #[serde(default = "default_warm_capacity")]
    pub warm_capacity_bytes: u64,
    #[serde(default = "default_cold_capacity")]
    pub cold_capacity_bytes: u64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,
    /// Accesses within `promote_window_ms` needed to move one tier hotter.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: u32,
    #[serde(default = "default_promote_window_ms")]
    pub promote_window_ms: u64,
    /// Inactivity after which an entry moves one tier colder.
    #[serde(default = "default_demote_after_ms")]
    pub demote_after_ms: u64,
    /// Smoothing factor for the inter-access interval average used by preloading.
    #[serde(default = "default_interval_ema_alpha")]
    pub interval_ema_alpha: f64,
    /// Maximum memoized results kept across all algorithms. Zero disables
    /// result memoization.
    #[serde(default)]
    pub memo_capacity: usize,
}

fn default_hot_capacity() -> u64 {
    64 * 1024 * 1024
}
fn default_warm_capacity() -> u64 {
    128 * 1024 * 1024
}
fn default_cold_capacity() -> u64 {
    256 * 1024 * 1024
}
fn default_recency_weight() -> f64 {
    1.0
}
fn default_frequency_weight() -> f64 {
    0.25
}
fn default_promote_threshold() -> u32 {
    3
}
fn default_promote_window_ms() -> u64 {
    60_000
}
fn default_demote_after_ms() -> u64 {
    300_000
}
fn default_interval_ema_alpha() -> f64 {
    0.3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity_bytes: default_hot_capacity(),
            warm_capacity_bytes: default_warm_capacity(),
            cold_capacity_bytes: default_cold_capacity(),
            recency_weight: default_recency_weight(),
            frequency_weight: default_frequency_weight(),
            promote_threshold: default_promote_threshold(),
            promote_window_ms: default_promote_window_ms(),
            demote_after_ms: default_demote_after_ms(),
            interval_ema_alpha: default_interval_ema_alpha(),
            memo_capacity: 0,
        }
    }
}

impl CacheConfig {
    pub fn capacity(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Hot => self.hot_capacity_bytes,
            Tier::Warm => self.warm_capacity_bytes,
            Tier::Cold => self.cold_capacity_bytes,
        }
    }

    pub fn promote_window(&self) -> Duration {
        Duration::from_millis(self.promote_window_ms)
    }

    pub fn demote_after(&self) -> Duration {
        Duration::from_millis(self.demote_after_ms)
    }
}

/// A resident, loaded algorithm implementation.
pub struct CacheEntry {
    pub algorithm_id: String,
    pub handle: Arc<dyn Executable>,
    pub tier: Tier,
    pub loaded_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
    pub resident_bytes: u64,
    tier_since: Instant,
    recent: VecDeque<Instant>,
}

impl CacheEntry {
    fn touch(&mut self, now: Instant) {
        self.last_used_at = now;
        self.use_count += 1;
        self.recent.push_back(now);
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.recent.front() {
            if now.saturating_duration_since(*front) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Uses recorded since the entry entered its current tier.
    fn uses_in_tier(&self) -> usize {
        self.recent.iter().filter(|t| **t >= self.tier_since).count()
    }

    /// `recency_weight / (1 + idle_secs) + frequency_weight * uses_in_window`.
    ///
    /// Expects `prune` to have run for the same `now`.
    fn score(&self, now: Instant, config: &CacheConfig) -> f64 {
        let idle = now.saturating_duration_since(self.last_used_at).as_secs_f64();
        config.recency_weight / (1.0 + idle) + config.frequency_weight * self.recent.len() as f64
    }
}

/// Point-in-time view of a cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub algorithm_id: String,
    pub tier: Tier,
    pub resident_bytes: u64,
    pub use_count: u64,
    pub recent_uses: usize,
    pub idle_ms: u64,
    pub age_ms: u64,
    pub score: f64,
}

/// Hot/warm/cold residency bookkeeping.
///
/// Pure data structure: time is passed in explicitly, pin state is supplied by
/// the caller through `is_pinned`, and no method ever blocks.
pub struct TieredCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl TieredCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn used_bytes(&self, tier: Tier) -> u64 {
        self.stats.resident_bytes.get(tier)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.entries.get(id).map(|e| e.tier)
    }

    /// Resident handle without recording an access.
    pub fn peek(&self, id: &str) -> Option<Arc<dyn Executable>> {
        self.entries.get(id).map(|e| e.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record_load(&mut self, success: bool) {
        if success {
            self.stats.loads += 1;
        } else {
            self.stats.load_failures += 1;
        }
    }

    /// Return the resident handle for `id`, recording a hit (or a miss).
    ///
    /// A hit may promote the entry one tier hotter.
    pub fn lookup(
        &mut self,
        id: &str,
        now: Instant,
        is_pinned: &dyn Fn(&str) -> bool,
    ) -> Option<Arc<dyn Executable>> {
        let window = self.config.promote_window();
        let threshold = self.config.promote_threshold as usize;
        let (handle, tier, promote) = match self.entries.get_mut(id) {
            Some(entry) => {
                entry.touch(now);
                entry.prune(now, window);
                let promote = entry.uses_in_tier() >= threshold;
                (entry.handle.clone(), entry.tier, promote)
            }
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        self.stats.hits.add(tier, 1);
        if promote {
            if let Some(hotter) = tier.hotter() {
                self.promote(id, hotter, now, is_pinned);
            }
        }
        Some(handle)
    }

    /// Insert a freshly loaded implementation into the cold tier, evicting the
    /// lowest-scoring unpinned cold entries as needed. Returns evicted ids.
    pub fn insert(
        &mut self,
        id: &str,
        handle: Arc<dyn Executable>,
        resident_bytes: u64,
        now: Instant,
        is_pinned: &dyn Fn(&str) -> bool,
    ) -> VertexResult<Vec<String>> {
        if let Some(existing) = self.entries.get_mut(id) {
            existing.handle = handle;
            existing.touch(now);
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        if !self.make_room(Tier::Cold, resident_bytes, None, now, is_pinned, &mut evicted) {
            return Err(VertexError::CacheLoad {
                algorithm: id.to_string(),
                reason: format!(
                    "cold tier cannot fit {resident_bytes} bytes (capacity {}, {} bytes held by pinned entries)",
                    self.config.cold_capacity_bytes,
                    self.used_bytes(Tier::Cold)
                ),
            });
        }

        let mut recent = VecDeque::new();
        recent.push_back(now);
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                algorithm_id: id.to_string(),
                handle,
                tier: Tier::Cold,
                loaded_at: now,
                last_used_at: now,
                use_count: 1,
                resident_bytes,
                tier_since: now,
                recent,
            },
        );
        self.stats.resident_bytes.add(Tier::Cold, resident_bytes);
        self.stats.entries.add(Tier::Cold, 1);
        debug!(algorithm = %id, bytes = resident_bytes, evicted = evicted.len(), "Cached algorithm");
        Ok(evicted)
    }

    /// Refresh recency without counting a use.
    pub fn touch(&mut self, id: &str, now: Instant) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_used_at = now;
        }
    }

    /// Demote entries idle for longer than the configured TTL by one tier.
    /// Returns the number of demotions.
    pub fn maintain(&mut self, now: Instant, is_pinned: &dyn Fn(&str) -> bool) -> usize {
        let ttl = self.config.demote_after();
        let mut candidates: Vec<(String, Tier, u64)> = self
            .entries
            .values()
            .filter(|e| {
                e.tier != Tier::Cold
                    && now.saturating_duration_since(e.last_used_at) >= ttl
                    && now.saturating_duration_since(e.tier_since) >= ttl
            })
            .map(|e| (e.algorithm_id.clone(), e.tier, e.resident_bytes))
            .collect();
        candidates.sort();

        let mut demoted = 0;
        let mut evicted = Vec::new();
        for (id, tier, bytes) in candidates {
            let Some(colder) = tier.colder() else {
                continue;
            };
            if self.make_room(colder, bytes, Some(&id), now, is_pinned, &mut evicted) {
                self.relocate(&id, colder, now);
                self.stats.demotions += 1;
                demoted += 1;
                debug!(algorithm = %id, from = %tier, to = %colder, "Demoted idle algorithm");
            }
        }
        demoted
    }

    /// Evict every unpinned cold entry, keeping only hot and warm residents.
    pub fn shed_cold(&mut self, is_pinned: &dyn Fn(&str) -> bool) -> Vec<String> {
        let mut victims: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.tier == Tier::Cold && !is_pinned(&e.algorithm_id))
            .map(|e| e.algorithm_id.clone())
            .collect();
        victims.sort();
        for id in &victims {
            self.evict(id);
        }
        victims
    }

    /// Entries ordered by tier then id.
    pub fn snapshot(&self, now: Instant) -> Vec<EntrySnapshot> {
        let window = self.config.promote_window();
        let mut out: Vec<EntrySnapshot> = self
            .entries
            .values()
            .map(|e| {
                let recent_uses = e
                    .recent
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) <= window)
                    .count();
                let idle = now.saturating_duration_since(e.last_used_at);
                EntrySnapshot {
                    algorithm_id: e.algorithm_id.clone(),
                    tier: e.tier,
                    resident_bytes: e.resident_bytes,
                    use_count: e.use_count,
                    recent_uses,
                    idle_ms: idle.as_millis() as u64,
                    age_ms: now.saturating_duration_since(e.loaded_at).as_millis() as u64,
                    score: self.config.recency_weight / (1.0 + idle.as_secs_f64())
                        + self.config.frequency_weight * recent_uses as f64,
                }
            })
            .collect();
        out.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.algorithm_id.cmp(&b.algorithm_id)));
        out
    }

    fn promote(&mut self, id: &str, hotter: Tier, now: Instant, is_pinned: &dyn Fn(&str) -> bool) {
        let Some(bytes) = self.entries.get(id).map(|e| e.resident_bytes) else {
            return;
        };
        let mut evicted = Vec::new();
        if self.make_room(hotter, bytes, Some(id), now, is_pinned, &mut evicted) {
            self.relocate(id, hotter, now);
            self.stats.promotions += 1;
            debug!(algorithm = %id, to = %hotter, "Promoted algorithm");
        }
    }

    /// Free space in `tier` until `needed` more bytes fit. Victims are demoted
    /// into the next colder tier when it has room, otherwise evicted.
    fn make_room(
        &mut self,
        tier: Tier,
        needed: u64,
        exclude: Option<&str>,
        now: Instant,
        is_pinned: &dyn Fn(&str) -> bool,
        evicted: &mut Vec<String>,
    ) -> bool {
        let capacity = self.config.capacity(tier);
        if needed > capacity {
            return false;
        }
        while self.used_bytes(tier) + needed > capacity {
            let Some(victim) = self.pick_victim(tier, exclude, now, is_pinned) else {
                return false;
            };
            let bytes = self
                .entries
                .get(&victim)
                .map(|e| e.resident_bytes)
                .unwrap_or_default();
            let demote_to = match tier.colder() {
                Some(colder) => self
                    .make_room(colder, bytes, exclude, now, is_pinned, evicted)
                    .then_some(colder),
                None => None,
            };
            match demote_to {
                Some(colder) => {
                    self.relocate(&victim, colder, now);
                    self.stats.demotions += 1;
                    debug!(algorithm = %victim, from = %tier, to = %colder, "Demoted to make room");
                }
                None => {
                    self.evict(&victim);
                    debug!(algorithm = %victim, tier = %tier, "Evicted algorithm");
                    evicted.push(victim);
                }
            }
        }
        true
    }

    /// Lowest-scoring unpinned entry of `tier`; ties go to the oldest load.
    fn pick_victim(
        &mut self,
        tier: Tier,
        exclude: Option<&str>,
        now: Instant,
        is_pinned: &dyn Fn(&str) -> bool,
    ) -> Option<String> {
        let window = self.config.promote_window();
        for entry in self.entries.values_mut().filter(|e| e.tier == tier) {
            entry.prune(now, window);
        }
        let config = &self.config;
        self.entries
            .values()
            .filter(|e| {
                e.tier == tier
                    && Some(e.algorithm_id.as_str()) != exclude
                    && !is_pinned(&e.algorithm_id)
            })
            .min_by(|a, b| {
                a.score(now, config)
                    .total_cmp(&b.score(now, config))
                    .then_with(|| a.loaded_at.cmp(&b.loaded_at))
            })
            .map(|e| e.algorithm_id.clone())
    }

    fn relocate(&mut self, id: &str, to: Tier, now: Instant) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        let from = entry.tier;
        let bytes = entry.resident_bytes;
        entry.tier = to;
        entry.tier_since = now;
        self.stats.resident_bytes.sub(from, bytes);
        self.stats.entries.sub(from, 1);
        self.stats.resident_bytes.add(to, bytes);
        self.stats.entries.add(to, 1);
    }

    fn evict(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            self.stats.resident_bytes.sub(entry.tier, entry.resident_bytes);
            self.stats.entries.sub(entry.tier, 1);
            self.stats.evictions.add(entry.tier, 1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::algorithm::ExecutionContext;
    use async_trait::async_trait;
    use vertex_core::Payload;

    struct Noop;

    #[async_trait]
    impl Executable for Noop {
        async fn execute(&self, input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
            Ok(input)
        }
    }

    fn handle() -> Arc<dyn Executable> {
        Arc::new(Noop)
    }

    fn small_config() -> CacheConfig {
        CacheConfig {
            hot_capacity_bytes: 100,
            warm_capacity_bytes: 100,
            cold_capacity_bytes: 100,
            promote_threshold: 3,
            promote_window_ms: 10_000,
            demote_after_ms: 1_000,
            ..CacheConfig::default()
        }
    }

    fn unpinned(_: &str) -> bool {
        false
    }

    #[test]
    fn test_insert_lands_in_cold() {
        let mut cache = TieredCache::new(small_config());
        let now = Instant::now();
        let evicted = cache.insert("a", handle(), 40, now, &unpinned).unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.tier_of("a"), Some(Tier::Cold));
        assert_eq!(cache.used_bytes(Tier::Cold), 40);
    }

    #[test]
    fn test_eviction_picks_lowest_score() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("old", handle(), 50, t0, &unpinned).unwrap();
        cache.insert("busy", handle(), 50, t0, &unpinned).unwrap();
        // "busy" is used again later, so "old" scores lower.
        let t1 = t0 + Duration::from_secs(5);
        assert!(cache.lookup("busy", t1, &unpinned).is_some());

        let evicted = cache.insert("new", handle(), 50, t1, &unpinned).unwrap();
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(cache.contains("new"));
        assert!(cache.contains("busy"));
        assert_eq!(cache.stats().evictions.cold, 1);
    }

    #[test]
    fn test_tie_broken_by_oldest_load() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("first", handle(), 50, t0, &unpinned).unwrap();
        cache.insert("second", handle(), 50, t0 + Duration::from_millis(1), &unpinned).unwrap();
        // Identical use counts; evaluate far enough in the future that recency is ~equal
        // and both accesses fall out of the window.
        let later = t0 + Duration::from_secs(3600);
        let evicted = cache.insert("third", handle(), 50, later, &unpinned).unwrap();
        assert_eq!(evicted, vec!["first".to_string()]);
    }

    #[test]
    fn test_pinned_entries_survive() {
        let mut cache = TieredCache::new(small_config());
        let now = Instant::now();
        cache.insert("pinned", handle(), 60, now, &unpinned).unwrap();
        let pinned = |id: &str| id == "pinned";
        let err = cache.insert("other", handle(), 60, now, &pinned).unwrap_err();
        assert!(matches!(err, VertexError::CacheLoad { .. }));
        assert!(cache.contains("pinned"));
        assert!(!cache.contains("other"));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let mut cache = TieredCache::new(small_config());
        let err = cache
            .insert("huge", handle(), 500, Instant::now(), &unpinned)
            .unwrap_err();
        assert!(matches!(err, VertexError::CacheLoad { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_promotion_after_threshold() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("a", handle(), 10, t0, &unpinned).unwrap();
        cache.lookup("a", t0 + Duration::from_millis(10), &unpinned);
        assert_eq!(cache.tier_of("a"), Some(Tier::Cold));
        cache.lookup("a", t0 + Duration::from_millis(20), &unpinned);
        assert_eq!(cache.tier_of("a"), Some(Tier::Warm));
        assert_eq!(cache.stats().promotions, 1);

        // Needs a fresh run of accesses in the new tier.
        cache.lookup("a", t0 + Duration::from_millis(30), &unpinned);
        assert_eq!(cache.tier_of("a"), Some(Tier::Warm));
        cache.lookup("a", t0 + Duration::from_millis(40), &unpinned);
        cache.lookup("a", t0 + Duration::from_millis(50), &unpinned);
        assert_eq!(cache.tier_of("a"), Some(Tier::Hot));
        assert_eq!(cache.used_bytes(Tier::Hot), 10);
        assert_eq!(cache.used_bytes(Tier::Cold), 0);
    }

    #[test]
    fn test_demotion_after_ttl() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("a", handle(), 10, t0, &unpinned).unwrap();
        for i in 1..=2 {
            cache.lookup("a", t0 + Duration::from_millis(i), &unpinned);
        }
        assert_eq!(cache.tier_of("a"), Some(Tier::Warm));

        assert_eq!(cache.maintain(t0 + Duration::from_millis(500), &unpinned), 0);
        assert_eq!(cache.maintain(t0 + Duration::from_secs(2), &unpinned), 1);
        assert_eq!(cache.tier_of("a"), Some(Tier::Cold));
        // Cold entries are never demoted further, only evicted under pressure.
        assert_eq!(cache.maintain(t0 + Duration::from_secs(10), &unpinned), 0);
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_shed_cold_keeps_warm_and_pinned() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("warm", handle(), 10, t0, &unpinned).unwrap();
        for i in 1..=2 {
            cache.lookup("warm", t0 + Duration::from_millis(i), &unpinned);
        }
        cache.insert("cold", handle(), 10, t0, &unpinned).unwrap();
        cache.insert("held", handle(), 10, t0, &unpinned).unwrap();

        let shed = cache.shed_cold(&|id: &str| id == "held");
        assert_eq!(shed, vec!["cold".to_string()]);
        assert!(cache.contains("warm"));
        assert!(cache.contains("held"));
    }

    #[test]
    fn test_capacity_never_exceeded_under_churn() {
        let mut cache = TieredCache::new(CacheConfig {
            hot_capacity_bytes: 64,
            warm_capacity_bytes: 96,
            cold_capacity_bytes: 128,
            promote_threshold: 2,
            demote_after_ms: 50,
            ..CacheConfig::default()
        });
        let t0 = Instant::now();
        // Deterministic linear congruential sequence.
        let mut seed: u64 = 0x2545_f491;
        for step in 0..2_000u64 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let id = format!("alg-{}", (seed >> 33) % 24);
            let size = 8 + (seed >> 40) % 40;
            let now = t0 + Duration::from_millis(step * 7);
            let pinned_id = format!("alg-{}", step % 24);
            let pinned = |k: &str| k == pinned_id;
            match (seed >> 20) % 4 {
                0 | 1 => {
                    if cache.lookup(&id, now, &pinned).is_none() {
                        let _ = cache.insert(&id, handle(), size, now, &pinned);
                    }
                }
                2 => {
                    cache.maintain(now, &pinned);
                }
                _ => {
                    cache.touch(&id, now);
                }
            }
            for tier in Tier::ALL {
                assert!(
                    cache.used_bytes(tier) <= cache.config().capacity(tier),
                    "tier {tier} over capacity at step {step}"
                );
            }
        }
    }

    #[test]
    fn test_snapshot_sorted_by_tier() {
        let mut cache = TieredCache::new(small_config());
        let t0 = Instant::now();
        cache.insert("b", handle(), 10, t0, &unpinned).unwrap();
        cache.insert("a", handle(), 10, t0, &unpinned).unwrap();
        for i in 1..=2 {
            cache.lookup("b", t0 + Duration::from_millis(i), &unpinned);
        }
        let snap = cache.snapshot(t0 + Duration::from_millis(5));
        assert_eq!(snap[0].algorithm_id, "b");
        assert_eq!(snap[0].tier, Tier::Warm);
        assert_eq!(snap[1].algorithm_id, "a");
    }
}
