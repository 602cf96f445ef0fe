use crate::algorithm::{AlgorithmCategory, AlgorithmDescriptor, Executable};
use crate::cache::{CacheConfig, CacheStats, EntrySnapshot, Tier, TieredCache};
use crate::catalog::AlgorithmCatalog;
use crate::memo::{MemoKey, ResultMemo};
use crate::preload::AccessPredictor;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vertex_core::{Payload, VertexError, VertexResult};

type LoadFuture = Shared<BoxFuture<'static, VertexResult<Arc<dyn Executable>>>>;

struct RegistryInner {
    catalog: AlgorithmCatalog,
    cache: Mutex<TieredCache>,
    /// Loads in progress. Locked before `cache` whenever both are held.
    inflight: Mutex<HashMap<String, LoadFuture>>,
    /// Fixed at construction; the catalog never changes at runtime.
    pins: HashMap<String, AtomicUsize>,
    load_counts: HashMap<String, AtomicU64>,
    predictor: Mutex<AccessPredictor>,
    memo: Mutex<ResultMemo>,
}

impl RegistryInner {
    fn is_pinned(&self, id: &str) -> bool {
        self.pins
            .get(id)
            .is_some_and(|p| p.load(Ordering::Acquire) > 0)
    }
}

/// Algorithm metadata plus a lazily populated, tiered cache of loaded
/// implementations.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    inner: Arc<RegistryInner>,
}

impl AlgorithmRegistry {
    pub fn new(catalog: AlgorithmCatalog, config: CacheConfig) -> Self {
        let pins = catalog
            .ids()
            .map(|id| (id.clone(), AtomicUsize::new(0)))
            .collect();
        let load_counts = catalog
            .ids()
            .map(|id| (id.clone(), AtomicU64::new(0)))
            .collect();
        let predictor = AccessPredictor::new(config.interval_ema_alpha);
        let memo = ResultMemo::new(config.memo_capacity);
        info!(algorithms = catalog.len(), "Algorithm registry initialized");
        Self {
            inner: Arc::new(RegistryInner {
                catalog,
                cache: Mutex::new(TieredCache::new(config)),
                inflight: Mutex::new(HashMap::new()),
                pins,
                load_counts,
                predictor: Mutex::new(predictor),
                memo: Mutex::new(memo),
            }),
        }
    }

    pub fn describe(&self, id: &str) -> VertexResult<AlgorithmDescriptor> {
        self.inner
            .catalog
            .descriptor(id)
            .cloned()
            .ok_or_else(|| VertexError::AlgorithmNotFound(id.to_string()))
    }

    pub fn descriptors(&self) -> Vec<AlgorithmDescriptor> {
        self.inner
            .catalog
            .descriptors()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Descriptors of one category, sorted by id.
    pub fn descriptors_by_category(&self, category: AlgorithmCategory) -> Vec<AlgorithmDescriptor> {
        self.inner
            .catalog
            .descriptors_by_category(category)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.catalog.get(id).is_some()
    }

    /// Return a resident implementation of `id`, loading it first if needed.
    ///
    /// Concurrent callers for the same cold id share one load and all observe
    /// its outcome. A failed load is not cached; the next call retries.
    pub async fn acquire(&self, id: &str) -> VertexResult<Arc<dyn Executable>> {
        if !self.contains(id) {
            return Err(VertexError::AlgorithmNotFound(id.to_string()));
        }
        self.inner.predictor.lock().record(id, Instant::now());
        self.get_or_load(id, true).await
    }

    /// Load `id` ahead of demand without counting an access.
    pub async fn preload(&self, id: &str) -> VertexResult<()> {
        if !self.contains(id) {
            return Err(VertexError::AlgorithmNotFound(id.to_string()));
        }
        self.get_or_load(id, false).await.map(|_| ())
    }

    async fn get_or_load(&self, id: &str, count_access: bool) -> VertexResult<Arc<dyn Executable>> {
        let load = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(id) {
                Some(pending) => {
                    debug!(algorithm = %id, "Joining in-flight load");
                    pending.clone()
                }
                None => {
                    {
                        let mut cache = self.inner.cache.lock();
                        if count_access {
                            let inner = &self.inner;
                            let is_pinned = |k: &str| inner.is_pinned(k);
                            if let Some(handle) = cache.lookup(id, Instant::now(), &is_pinned) {
                                return Ok(handle);
                            }
                        } else if let Some(handle) = cache.peek(id) {
                            return Ok(handle);
                        }
                    }
                    let fut = self.clone().load(id.to_string()).boxed().shared();
                    inflight.insert(id.to_string(), fut.clone());
                    fut
                }
            }
        };
        load.await
    }

    async fn load(self, id: String) -> VertexResult<Arc<dyn Executable>> {
        let inner = &self.inner;
        let Some(registration) = inner.catalog.get(&id) else {
            inner.inflight.lock().remove(&id);
            return Err(VertexError::AlgorithmNotFound(id));
        };
        if let Some(count) = inner.load_counts.get(&id) {
            count.fetch_add(1, Ordering::AcqRel);
        }
        let started = Instant::now();
        let loaded = registration.loader.load(&registration.descriptor).await;

        let mut inflight = inner.inflight.lock();
        let mut cache = inner.cache.lock();
        let outcome = match loaded {
            Ok(handle) => {
                let is_pinned = |k: &str| inner.is_pinned(k);
                cache
                    .insert(
                        &id,
                        handle.clone(),
                        registration.descriptor.resident_bytes(),
                        Instant::now(),
                        &is_pinned,
                    )
                    .map(|evicted| {
                        if !evicted.is_empty() {
                            info!(algorithm = %id, evicted = ?evicted, "Evicted algorithms to admit load");
                        }
                        handle
                    })
            }
            Err(VertexError::CacheLoad { algorithm, reason }) => {
                Err(VertexError::CacheLoad { algorithm, reason })
            }
            Err(e) => Err(VertexError::CacheLoad {
                algorithm: id.clone(),
                reason: e.to_string(),
            }),
        };
        cache.record_load(outcome.is_ok());
        inflight.remove(&id);
        drop(cache);
        drop(inflight);

        match &outcome {
            Ok(_) => info!(
                algorithm = %id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Loaded algorithm"
            ),
            Err(e) => warn!(algorithm = %id, error = %e, "Algorithm load failed"),
        }
        outcome
    }

    /// Increment the pin count of `id`. Pinned entries are never evicted.
    pub fn pin(&self, id: &str) -> VertexResult<usize> {
        let counter = self
            .inner
            .pins
            .get(id)
            .ok_or_else(|| VertexError::AlgorithmNotFound(id.to_string()))?;
        Ok(counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Decrement the pin count of `id`, saturating at zero.
    pub fn unpin(&self, id: &str) -> VertexResult<usize> {
        let counter = self
            .inner
            .pins
            .get(id)
            .ok_or_else(|| VertexError::AlgorithmNotFound(id.to_string()))?;
        match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
            Ok(prev) => Ok(prev - 1),
            Err(_) => {
                warn!(algorithm = %id, "Unpin without matching pin");
                Ok(0)
            }
        }
    }

    /// Drop one pin and refresh recency; never evicts.
    pub fn release(&self, id: &str) -> VertexResult<()> {
        self.unpin(id)?;
        self.inner.cache.lock().touch(id, Instant::now());
        Ok(())
    }

    /// Pin every id and return a guard that releases them on drop.
    ///
    /// Either all ids are pinned or none are.
    pub fn pin_all<I, S>(&self, ids: I) -> VertexResult<PinGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = PinGuard {
            registry: self.clone(),
            ids: Vec::new(),
        };
        for id in ids {
            let id = id.into();
            self.pin(&id)?;
            guard.ids.push(id);
        }
        Ok(guard)
    }

    pub fn pin_count(&self, id: &str) -> usize {
        self.inner
            .pins
            .get(id)
            .map(|p| p.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_resident(&self, id: &str) -> bool {
        self.inner.cache.lock().contains(id)
    }

    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.inner.cache.lock().tier_of(id)
    }

    /// Number of loader invocations for `id` since startup.
    pub fn load_count(&self, id: &str) -> u64 {
        self.inner
            .load_counts
            .get(id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Evict every unpinned cold entry.
    pub fn shed_cold(&self) -> Vec<String> {
        let inner = &self.inner;
        let is_pinned = |k: &str| inner.is_pinned(k);
        let shed = inner.cache.lock().shed_cold(&is_pinned);
        if !shed.is_empty() {
            info!(count = shed.len(), algorithms = ?shed, "Shed cold-tier algorithms");
        }
        shed
    }

    /// Apply the idle demotion TTL. Returns the number of demotions.
    pub fn maintain(&self) -> usize {
        let inner = &self.inner;
        let is_pinned = |k: &str| inner.is_pinned(k);
        inner.cache.lock().maintain(Instant::now(), &is_pinned)
    }

    /// Memo key for running `id` on `input`, or `None` when memoization is
    /// off or `id` is unknown or declared nondeterministic.
    pub fn memo_key(&self, id: &str, input: &Payload) -> Option<MemoKey> {
        let deterministic = self.inner.catalog.descriptor(id)?.deterministic;
        if !deterministic || !self.inner.memo.lock().is_enabled() {
            return None;
        }
        Some(MemoKey::new(id, input))
    }

    pub fn memo_get(&self, key: &MemoKey) -> Option<Payload> {
        let hit = self.inner.memo.lock().get(key);
        if hit.is_some() {
            debug!(algorithm = key.algorithm(), "Memoized result reused");
        }
        hit
    }

    pub fn memo_put(&self, key: MemoKey, output: Payload) {
        self.inner.memo.lock().insert(key, output);
    }

    /// Forget memoized results of `id`. Returns how many were dropped.
    pub fn invalidate_memo(&self, id: &str) -> usize {
        self.inner.memo.lock().invalidate(id)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.cache.lock().stats();
        stats.memo = self.inner.memo.lock().stats();
        stats
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.inner.cache.lock().snapshot(Instant::now())
    }

    /// Non-resident ids whose next access is predicted within `lookahead`.
    pub fn due_for_preload(&self, lookahead: Duration) -> Vec<String> {
        let due = self.inner.predictor.lock().due(Instant::now(), lookahead);
        let cache = self.inner.cache.lock();
        due.into_iter().filter(|id| !cache.contains(id)).collect()
    }
}

/// Pins held for the duration of a task; released on drop.
pub struct PinGuard {
    registry: AlgorithmRegistry,
    ids: Vec<String>,
}

impl PinGuard {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        for id in &self.ids {
            if let Err(e) = self.registry.release(id) {
                warn!(algorithm = %id, error = %e, "Failed to release pin");
            }
        }
    }
}
