use crate::types::{Task, TaskState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Every known task, live or terminal, until retention expires.
#[derive(Default)]
pub struct TaskTable {
    tasks: HashMap<Uuid, Task>,
}

impl TaskTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a task, keyed by its id.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Task by id.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Mutable task by id.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Retained tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is retained.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks currently in `state`.
    pub fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Drop terminal tasks that finished before `cutoff`. Returns their ids.
    pub fn purge_finished_before(&mut self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.state.is_terminal() && t.finished_at.is_some_and(|f| f < cutoff))
            .map(|t| t.id)
            .collect();
        for id in &expired {
            self.tasks.remove(id);
        }
        expired
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{SubmitRequest, TaskSpec};
    use serde_json::json;

    fn task() -> Task {
        Task::new(
            SubmitRequest::new(TaskSpec::Single { algorithm: "a".into() }, json!(1)),
            1_000,
        )
    }

    #[test]
    fn test_purge_only_old_terminal_tasks() {
        let mut table = TaskTable::new();
        let mut done = task();
        done.transition(TaskState::Cancelled).unwrap();
        let done_id = done.id;
        let live = task();
        let live_id = live.id;
        table.insert(done);
        table.insert(live);

        assert!(table.purge_finished_before(Utc::now() - chrono::Duration::hours(1)).is_empty());
        let purged = table.purge_finished_before(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(purged, vec![done_id]);
        assert!(table.get(live_id).is_some());
        assert_eq!(table.count_in(TaskState::Queued), 1);
    }
}
