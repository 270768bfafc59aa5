use crate::types::{Task, TaskStatus};
use maestro_core::Priority;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Priority queue with one FIFO band per priority level.
///
/// Tasks leave in strictly descending priority; within a band they leave in
/// submission order, except that retried tasks re-enter at the front of
/// their band.
pub struct TaskQueue {
    bands: BTreeMap<Priority, VecDeque<Task>>,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            bands: BTreeMap::new(),
        }
    }

    /// Append a task to the back of its priority band.
    pub fn push(&mut self, mut task: Task) -> Uuid {
        let id = task.id;
        task.status = TaskStatus::Queued;
        self.bands.entry(task.priority).or_default().push_back(task);
        id
    }

    /// Put a task back at the front of its priority band.
    pub fn push_front(&mut self, mut task: Task) -> Uuid {
        let id = task.id;
        task.status = TaskStatus::Queued;
        self.bands.entry(task.priority).or_default().push_front(task);
        id
    }

    /// Remove every task for which `take` returns `true`, visiting tasks in
    /// dispatch order. Tasks that are skipped keep their relative order.
    pub fn take_where(&mut self, mut take: impl FnMut(&Task) -> bool) -> Vec<Task> {
        let mut taken = Vec::new();
        for band in self.bands.values_mut().rev() {
            let mut kept = VecDeque::with_capacity(band.len());
            while let Some(task) = band.pop_front() {
                if take(&task) {
                    taken.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            *band = kept;
        }
        taken
    }

    /// Look up a queued task by id.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.iter().find(|t| t.id == id)
    }

    /// Queued tasks in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.bands.values().rev().flat_map(VecDeque::iter)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.bands.values().map(VecDeque::len).sum()
    }

    /// True when no task is queued.
    pub fn is_empty(&self) -> bool {
        self.bands.values().all(VecDeque::is_empty)
    }

    /// Count of queued tasks per priority (only non-empty bands).
    pub fn len_by_priority(&self) -> BTreeMap<Priority, usize> {
        self.bands
            .iter()
            .filter(|(_, band)| !band.is_empty())
            .map(|(priority, band)| (*priority, band.len()))
            .collect()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
