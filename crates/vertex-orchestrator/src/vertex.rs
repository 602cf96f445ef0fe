use crate::types::TaskSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Success rates are floored at this value when inflating expected times.
const MIN_SUCCESS_RATE: f64 = 0.05;

/// Rolling execution statistics of one algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmStats {
    /// Completed executions, successful or not.
    pub runs: u64,
    /// Executions that produced an output.
    pub successes: u64,
    /// Exponential moving average, milliseconds.
    pub avg_execution_ms: f64,
}

impl AlgorithmStats {
    /// Fold one execution into the averages. `alpha` weights the newest run.
    pub fn record(&mut self, duration_ms: f64, success: bool, alpha: f64) {
        self.avg_execution_ms = if self.runs == 0 {
            duration_ms
        } else {
            alpha * duration_ms + (1.0 - alpha) * self.avg_execution_ms
        };
        self.runs += 1;
        if success {
            self.successes += 1;
        }
    }

    /// Successes over runs; 1.0 before the first run.
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            1.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }

    /// Average time inflated by the failure rate; `None` before the first run.
    pub fn expected_ms(&self) -> Option<f64> {
        (self.runs > 0).then(|| self.avg_execution_ms / self.success_rate().max(MIN_SUCCESS_RATE))
    }
}

/// A logical execution slot with bounded concurrency.
#[derive(Debug)]
pub struct Vertex {
    /// Stable id, never reused after removal.
    pub id: usize,
    /// Maximum concurrently assigned tasks.
    pub capacity: usize,
    /// Assigned task ids and the execution time expected for each.
    assigned: HashMap<Uuid, f64>,
    stats: HashMap<String, AlgorithmStats>,
    /// Scheduled for removal by a pool shrink; takes no new work.
    retiring: bool,
}

impl Vertex {
    fn new(id: usize, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            assigned: HashMap::new(),
            stats: HashMap::new(),
            retiring: false,
        }
    }

    /// Number of assigned tasks.
    pub fn load(&self) -> usize {
        self.assigned.len()
    }

    /// Whether the vertex can take another task now.
    pub fn has_capacity(&self) -> bool {
        !self.retiring && self.assigned.len() < self.capacity
    }

    /// Sum of the expected times of the assigned tasks.
    pub fn load_estimate_ms(&self) -> f64 {
        self.assigned.values().sum()
    }

    fn expected_ms(&self, algorithm: &str, fallback: &dyn Fn(&str) -> f64) -> f64 {
        self.stats
            .get(algorithm)
            .and_then(AlgorithmStats::expected_ms)
            .unwrap_or_else(|| fallback(algorithm))
    }

    /// Expected execution time of a whole task on this vertex.
    pub fn expected_task_ms(
        &self,
        spec: &TaskSpec,
        group_parallelism: usize,
        fallback: &dyn Fn(&str) -> f64,
    ) -> f64 {
        match spec {
            TaskSpec::Single { algorithm } => self.expected_ms(algorithm, fallback),
            TaskSpec::Chain { steps } => steps.iter().map(|s| self.expected_ms(s, fallback)).sum(),
            TaskSpec::Group { algorithms, .. } => {
                let times: Vec<f64> = algorithms
                    .iter()
                    .map(|a| self.expected_ms(a, fallback))
                    .collect();
                let longest = times.iter().copied().fold(0.0, f64::max);
                let waves = times.iter().sum::<f64>() / group_parallelism.max(1) as f64;
                longest.max(waves)
            }
        }
    }
}

/// Point-in-time view of a vertex for the metrics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexSnapshot {
    /// Vertex id.
    pub id: usize,
    /// Maximum concurrent tasks.
    pub capacity: usize,
    /// Tasks currently assigned.
    pub load: usize,
    /// Expected milliseconds of assigned work.
    pub load_estimate_ms: f64,
    /// Draining ahead of removal.
    pub retiring: bool,
    /// Assigned task ids, sorted.
    pub assigned: Vec<Uuid>,
    /// Per-algorithm history on this vertex.
    pub algorithms: BTreeMap<String, AlgorithmStats>,
}

/// Outcome of a pool resize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeReport {
    /// Ids of new vertices.
    pub added: Vec<usize>,
    /// Idle vertices removed immediately.
    pub removed: Vec<usize>,
    /// Busy vertices that will be removed once their tasks finish.
    pub retiring: Vec<usize>,
}

/// The set of vertices plus per-vertex load bookkeeping.
pub struct VertexPool {
    vertices: BTreeMap<usize, Vertex>,
    capacity: usize,
    next_id: usize,
    alpha: f64,
}

impl VertexPool {
    /// `count` vertices with ids `0..count`. `alpha` smooths execution averages.
    pub fn new(count: usize, capacity: usize, alpha: f64) -> Self {
        let vertices = (0..count).map(|id| (id, Vertex::new(id, capacity))).collect();
        Self {
            vertices,
            capacity,
            next_id: count,
            alpha,
        }
    }

    /// Vertices in the pool, retiring ones included.
    pub fn len(&self) -> usize {
        self.vertices.values().filter(|v| !v.retiring).count()
    }

    /// Whether the pool has no vertices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vertex by id.
    pub fn get(&self, id: usize) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    /// Whether any vertex can take a task.
    pub fn has_spare_capacity(&self) -> bool {
        self.vertices.values().any(Vertex::has_capacity)
    }

    /// Assigned tasks across the pool.
    pub fn total_load(&self) -> usize {
        self.vertices.values().map(Vertex::load).sum()
    }

    /// Vertex with spare capacity minimizing `load_estimate + expected_time`.
    /// Ties go to the lowest id. Returns the vertex id and the expected time.
    pub fn select(
        &self,
        spec: &TaskSpec,
        group_parallelism: usize,
        fallback: &dyn Fn(&str) -> f64,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for vertex in self.vertices.values().filter(|v| v.has_capacity()) {
            let expected = vertex.expected_task_ms(spec, group_parallelism, fallback);
            let finish = vertex.load_estimate_ms() + expected;
            // BTreeMap iterates in ascending id order, so strict `<` keeps the lowest id on ties.
            let better = match best {
                Some((_, best_finish, _)) => finish < best_finish,
                None => true,
            };
            if better {
                best = Some((vertex.id, finish, expected));
            }
        }
        best.map(|(id, _, expected)| (id, expected))
    }

    /// Reserve a slot on `vertex`. False if it is gone, full or retiring.
    pub fn assign(&mut self, vertex: usize, task: Uuid, expected_ms: f64) -> bool {
        match self.vertices.get_mut(&vertex) {
            Some(v) if v.has_capacity() => {
                v.assigned.insert(task, expected_ms);
                true
            }
            _ => false,
        }
    }

    /// Free the slot held by `task`. A retiring vertex left idle is removed.
    /// Returns true if the vertex was removed.
    pub fn release(&mut self, vertex: usize, task: Uuid) -> bool {
        let Some(v) = self.vertices.get_mut(&vertex) else {
            return false;
        };
        v.assigned.remove(&task);
        if v.retiring && v.assigned.is_empty() {
            self.vertices.remove(&vertex);
            return true;
        }
        false
    }

    /// Add one execution of `algorithm` to the history of `vertex`.
    pub fn record(&mut self, vertex: usize, algorithm: &str, duration_ms: f64, success: bool) {
        if let Some(v) = self.vertices.get_mut(&vertex) {
            v.stats
                .entry(algorithm.to_string())
                .or_default()
                .record(duration_ms, success, self.alpha);
        }
    }

    /// Grow by adding fresh vertices or shrink by retiring the highest ids.
    pub fn resize(&mut self, target: usize) -> ResizeReport {
        let mut report = ResizeReport::default();
        let active: Vec<usize> = self
            .vertices
            .values()
            .filter(|v| !v.retiring)
            .map(|v| v.id)
            .collect();

        if target > active.len() {
            for _ in active.len()..target {
                let id = self.next_id;
                self.next_id += 1;
                self.vertices.insert(id, Vertex::new(id, self.capacity));
                report.added.push(id);
            }
        } else {
            for id in active.iter().rev().take(active.len() - target) {
                let idle = self.vertices.get(id).is_some_and(|v| v.assigned.is_empty());
                if idle {
                    self.vertices.remove(id);
                    report.removed.push(*id);
                } else if let Some(v) = self.vertices.get_mut(id) {
                    v.retiring = true;
                    report.retiring.push(*id);
                }
            }
        }
        report
    }

    /// Every vertex, in id order.
    pub fn snapshot(&self) -> Vec<VertexSnapshot> {
        self.vertices
            .values()
            .map(|v| {
                let mut assigned: Vec<Uuid> = v.assigned.keys().copied().collect();
                assigned.sort();
                VertexSnapshot {
                    id: v.id,
                    capacity: v.capacity,
                    load: v.load(),
                    load_estimate_ms: v.load_estimate_ms(),
                    retiring: v.retiring,
                    assigned,
                    algorithms: v.stats.iter().map(|(k, s)| (k.clone(), s.clone())).collect(),
                }
            })
            .collect()
    }

    /// Vertex ids in ascending order.
    pub fn ids(&self) -> Vec<usize> {
        self.vertices.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(alg: &str) -> TaskSpec {
        TaskSpec::Single {
            algorithm: alg.to_string(),
        }
    }

    fn ten_ms(_: &str) -> f64 {
        10.0
    }

    #[test]
    fn test_stats_ema_and_success_rate() {
        let mut s = AlgorithmStats::default();
        assert!(s.expected_ms().is_none());
        s.record(100.0, true, 0.5);
        s.record(200.0, false, 0.5);
        assert_eq!(s.avg_execution_ms, 150.0);
        assert_eq!(s.success_rate(), 0.5);
        assert_eq!(s.expected_ms(), Some(300.0));
    }

    #[test]
    fn test_tie_break_lowest_id() {
        let pool = VertexPool::new(3, 2, 0.3);
        assert_eq!(pool.select(&single("a"), 4, &ten_ms), Some((0, 10.0)));
    }

    #[test]
    fn test_select_prefers_less_loaded() {
        let mut pool = VertexPool::new(2, 2, 0.3);
        assert!(pool.assign(0, Uuid::new_v4(), 50.0));
        assert_eq!(pool.select(&single("a"), 4, &ten_ms).map(|s| s.0), Some(1));
    }

    #[test]
    fn test_select_replaces_loaded_first_candidate() {
        let mut pool = VertexPool::new(3, 2, 0.3);
        assert!(pool.assign(0, Uuid::new_v4(), 50.0));
        // Vertices 1 and 2 tie; the lower id wins over the loaded vertex 0.
        assert_eq!(pool.select(&single("a"), 4, &ten_ms), Some((1, 10.0)));
        assert!(pool.assign(1, Uuid::new_v4(), 20.0));
        assert_eq!(pool.select(&single("a"), 4, &ten_ms).map(|s| s.0), Some(2));
    }

    #[test]
    fn test_select_uses_history() {
        let mut pool = VertexPool::new(2, 2, 1.0);
        pool.record(0, "a", 500.0, true);
        pool.record(1, "a", 5.0, true);
        assert_eq!(pool.select(&single("a"), 4, &ten_ms).map(|s| s.0), Some(1));
    }

    #[test]
    fn test_capacity_respected() {
        let mut pool = VertexPool::new(1, 1, 0.3);
        assert!(pool.assign(0, Uuid::new_v4(), 1.0));
        assert!(!pool.has_spare_capacity());
        assert!(pool.select(&single("a"), 4, &ten_ms).is_none());
        assert!(!pool.assign(0, Uuid::new_v4(), 1.0));
    }

    #[test]
    fn test_chain_and_group_estimates() {
        let pool = VertexPool::new(1, 1, 0.3);
        let v = pool.get(0).unwrap_or_else(|| panic!("vertex 0 missing"));
        let chain = TaskSpec::Chain {
            steps: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(v.expected_task_ms(&chain, 4, &ten_ms), 30.0);
        let group = TaskSpec::Group {
            algorithms: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            policy: Default::default(),
        };
        assert_eq!(v.expected_task_ms(&group, 4, &ten_ms), 10.0);
        assert_eq!(v.expected_task_ms(&group, 2, &ten_ms), 20.0);
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let mut pool = VertexPool::new(2, 1, 0.3);
        let report = pool.resize(4);
        assert_eq!(report.added, vec![2, 3]);
        assert_eq!(pool.len(), 4);

        let busy = Uuid::new_v4();
        assert!(pool.assign(3, busy, 1.0));
        let report = pool.resize(2);
        assert_eq!(report.retiring, vec![3]);
        assert_eq!(report.removed, vec![2]);
        assert_eq!(pool.len(), 2);
        assert!(pool.select(&single("a"), 1, &ten_ms).map(|s| s.0) != Some(3));

        assert!(pool.release(3, busy));
        assert_eq!(pool.ids(), vec![0, 1]);
    }
}
