// scheduler.rs
//
// Deferred signal actions. Each task remembers the generation its
// intersection had when it was scheduled; the engine drops the task on fire
// if the intersection has moved on since.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Who asked for the task, and so who may cancel it in bulk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOwner {
    /// A step of a multi-intersection coordination plan.
    Coordination,
    /// A preemption ahead of an emergency vehicle.
    Emergency(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTask {
    pub id: TaskId,
    pub due_at: u64,
    pub intersection_id: String,
    pub generation: u64,
    pub owner: TaskOwner,
}

/// Pending tasks ordered by due time, ties in scheduling order.
#[derive(Debug, Default)]
pub struct DeferredScheduler {
    next_id: u64,
    queue: BTreeMap<(u64, TaskId), DeferredTask>,
    due_index: HashMap<TaskId, u64>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        due_at: u64,
        intersection_id: &str,
        generation: u64,
        owner: TaskOwner,
    ) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.queue.insert(
            (due_at, id),
            DeferredTask {
                id,
                due_at,
                intersection_id: intersection_id.to_string(),
                generation,
                owner,
            },
        );
        self.due_index.insert(id, due_at);
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> Option<DeferredTask> {
        let due_at = self.due_index.remove(&id)?;
        self.queue.remove(&(due_at, id))
    }

    /// Cancels every task owned by the vehicle and returns them.
    pub fn cancel_owned_by(&mut self, vehicle_id: &str) -> Vec<DeferredTask> {
        let keys: Vec<(u64, TaskId)> = self
            .queue
            .iter()
            .filter(|(_, task)| matches!(&task.owner, TaskOwner::Emergency(v) if v == vehicle_id))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                self.due_index.remove(&key.1);
                self.queue.remove(&key)
            })
            .collect()
    }

    /// Removes and returns every task due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: u64) -> Vec<DeferredTask> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            self.due_index.remove(&task.id);
            due.push(task);
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pending tasks in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &DeferredTask> {
        self.queue.values()
    }

    pub fn next_due(&self) -> Option<u64> {
        self.queue.keys().next().map(|(due_at, _)| *due_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: &str) -> TaskOwner {
        TaskOwner::Emergency(id.to_string())
    }

    #[test]
    fn drains_in_due_order_with_fifo_ties() {
        let mut s = DeferredScheduler::new();
        let late = s.schedule(500, "a", 0, TaskOwner::Coordination);
        let first = s.schedule(100, "b", 0, TaskOwner::Coordination);
        let second = s.schedule(100, "c", 0, vehicle("amb1"));

        let due: Vec<TaskId> = s.drain_due(100).iter().map(|t| t.id).collect();
        assert_eq!(due, vec![first, second]);
        assert_eq!(s.pending(), 1);
        assert_eq!(s.next_due(), Some(500));

        assert!(s.drain_due(499).is_empty());
        assert_eq!(s.drain_due(10_000)[0].id, late);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn cancel_removes_a_single_task() {
        let mut s = DeferredScheduler::new();
        let id = s.schedule(100, "a", 3, TaskOwner::Coordination);
        let task = s.cancel(id).unwrap();
        assert_eq!(task.generation, 3);
        assert!(s.cancel(id).is_none());
        assert!(s.drain_due(1_000).is_empty());
    }

    #[test]
    fn cancel_owned_by_only_touches_that_vehicle() {
        let mut s = DeferredScheduler::new();
        s.schedule(100, "a", 0, vehicle("amb1"));
        s.schedule(200, "b", 0, vehicle("amb1"));
        s.schedule(150, "b", 0, vehicle("fire1"));
        s.schedule(50, "c", 0, TaskOwner::Coordination);

        let cancelled = s.cancel_owned_by("amb1");
        assert_eq!(cancelled.len(), 2);
        assert_eq!(s.pending(), 2);
        assert!(s.cancel_owned_by("amb1").is_empty());
        let owners: Vec<&TaskOwner> = s.iter().map(|t| &t.owner).collect();
        assert_eq!(owners, vec![&TaskOwner::Coordination, &vehicle("fire1")]);
    }
}
