use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;
use vertex_core::Priority;

/// Ordering key: priority ascending, then submission order.
type QueueKey = (Priority, u64, Uuid);

/// Pending tasks ordered by `(priority, submitted_at)`.
///
/// Submission order is tracked with a monotonically increasing sequence
/// number, so equal-priority tasks are FIFO even when wall-clock timestamps
/// collide.
pub struct TaskQueue {
    ordered: BTreeSet<QueueKey>,
    index: HashMap<Uuid, QueueKey>,
    next_seq: u64,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            ordered: BTreeSet::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Enqueue `id`. Already-queued ids keep their place.
    pub fn push(&mut self, id: Uuid, priority: Priority) {
        if self.index.contains_key(&id) {
            return;
        }
        let key = (priority, self.next_seq, id);
        self.next_seq += 1;
        self.ordered.insert(key);
        self.index.insert(id, key);
    }

    /// Remove and return the highest-priority, earliest-submitted task.
    pub fn pop_next(&mut self) -> Option<Uuid> {
        let key = self.ordered.pop_first()?;
        self.index.remove(&key.2);
        Some(key.2)
    }

    /// The task `pop_next` would return.
    pub fn peek_next(&self) -> Option<Uuid> {
        self.ordered.first().map(|k| k.2)
    }

    /// Remove a specific task. Returns whether it was queued.
    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.index.remove(&id) {
            Some(key) => self.ordered.remove(&key),
            None => false,
        }
    }

    /// Remove every task whose priority is non-critical (4 or 5), returning
    /// them in queue order.
    pub fn shed_non_critical(&mut self) -> Vec<Uuid> {
        let shed: Vec<QueueKey> = self
            .ordered
            .iter()
            .filter(|(p, _, _)| p.is_non_critical())
            .copied()
            .collect();
        for key in &shed {
            self.ordered.remove(key);
            self.index.remove(&key.2);
        }
        shed.into_iter().map(|k| k.2).collect()
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Queued tasks.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Queued task counts per priority value.
    pub fn depth_by_priority(&self) -> [usize; 5] {
        let mut counts = [0; 5];
        for (p, _, _) in &self.ordered {
            counts[usize::from(p.value() - 1)] += 1;
        }
        counts
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut q = TaskQueue::new();
        let t = ids(4);
        q.push(t[0], Priority::LOW);
        q.push(t[1], Priority::HIGH);
        q.push(t[2], Priority::LOW);
        q.push(t[3], Priority::CRITICAL);

        assert_eq!(q.pop_next(), Some(t[3]));
        assert_eq!(q.pop_next(), Some(t[1]));
        assert_eq!(q.pop_next(), Some(t[0]));
        assert_eq!(q.pop_next(), Some(t[2]));
        assert_eq!(q.pop_next(), None);
    }

    #[test]
    fn test_remove() {
        let mut q = TaskQueue::new();
        let t = ids(2);
        q.push(t[0], Priority::MEDIUM);
        q.push(t[1], Priority::MEDIUM);
        assert!(q.remove(t[0]));
        assert!(!q.remove(t[0]));
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_next(), Some(t[1]));
    }

    #[test]
    fn test_duplicate_push_ignored() {
        let mut q = TaskQueue::new();
        let id = Uuid::new_v4();
        q.push(id, Priority::MEDIUM);
        q.push(id, Priority::CRITICAL);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_shed_non_critical() {
        let mut q = TaskQueue::new();
        let t = ids(4);
        q.push(t[0], Priority::BACKGROUND);
        q.push(t[1], Priority::CRITICAL);
        q.push(t[2], Priority::LOW);
        q.push(t[3], Priority::MEDIUM);

        let shed = q.shed_non_critical();
        assert_eq!(shed, vec![t[2], t[0]]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.depth_by_priority(), [1, 0, 1, 0, 0]);
    }
}
