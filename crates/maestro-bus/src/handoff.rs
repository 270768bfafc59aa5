use chrono::{DateTime, Utc};
use maestro_core::{MaestroError, MaestroResult, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A task passed directly from one agent to another, outside the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandoff {
    /// Handoff id.
    pub id: Uuid,
    /// Agent giving the task away.
    pub source_agent: String,
    /// Agent the task is offered to.
    pub target_agent: String,
    /// Kind of work handed over.
    pub task_type: String,
    /// Task input.
    pub payload: serde_json::Value,
    /// Urgency of the handoff.
    pub priority: Priority,
    /// After this the handoff can no longer be accepted.
    pub deadline: Option<DateTime<Utc>>,
    /// When the handoff was offered.
    pub created_at: DateTime<Utc>,
}

impl TaskHandoff {
    /// Whether `deadline` has passed at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Pending handoffs, keyed by target agent.
pub(crate) struct HandoffBox {
    pending: Mutex<HashMap<String, Vec<TaskHandoff>>>,
}

impl HandoffBox {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, handoff: TaskHandoff) {
        self.pending
            .lock()
            .entry(handoff.target_agent.clone())
            .or_default()
            .push(handoff);
    }

    /// Pending handoffs for `target`, most urgent first, then oldest first.
    pub(crate) fn pending_for(&self, target: &str, now: DateTime<Utc>) -> Vec<TaskHandoff> {
        let pending = self.pending.lock();
        let mut handoffs: Vec<TaskHandoff> = pending
            .get(target)
            .map(|list| {
                list.iter()
                    .filter(|h| !h.is_overdue_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        handoffs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        handoffs
    }

    /// Remove and return the handoff. Succeeds at most once per id.
    pub(crate) fn take(&self, id: Uuid, now: DateTime<Utc>) -> MaestroResult<TaskHandoff> {
        let mut pending = self.pending.lock();
        let mut found = None;
        for list in pending.values_mut() {
            if let Some(pos) = list.iter().position(|h| h.id == id) {
                found = Some(list.remove(pos));
                break;
            }
        }
        pending.retain(|_, list| !list.is_empty());
        drop(pending);

        let handoff =
            found.ok_or_else(|| MaestroError::NotFound(format!("handoff {id} is not pending")))?;
        if handoff.is_overdue_at(now) {
            return Err(MaestroError::Timeout(format!(
                "handoff {id} passed its deadline"
            )));
        }
        Ok(handoff)
    }

    pub(crate) fn purge_overdue(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock();
        let mut removed = 0;
        for list in pending.values_mut() {
            let before = list.len();
            list.retain(|h| !h.is_overdue_at(now));
            removed += before - list.len();
        }
        pending.retain(|_, list| !list.is_empty());
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handoff(target: &str, priority: Priority) -> TaskHandoff {
        TaskHandoff {
            id: Uuid::new_v4(),
            source_agent: "src".into(),
            target_agent: target.into(),
            task_type: "review".into(),
            payload: json!({}),
            priority,
            deadline: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_take_exactly_once() {
        let inbox = HandoffBox::new();
        let h = handoff("writer", Priority::Medium);
        let id = h.id;
        inbox.insert(h);

        assert_eq!(inbox.take(id, Utc::now()).unwrap().id, id);
        assert!(matches!(
            inbox.take(id, Utc::now()),
            Err(MaestroError::NotFound(_))
        ));
        assert_eq!(inbox.len(), 0);
    }

    #[test]
    fn test_pending_sorted_by_priority() {
        let inbox = HandoffBox::new();
        inbox.insert(handoff("writer", Priority::Low));
        inbox.insert(handoff("writer", Priority::Urgent));
        inbox.insert(handoff("editor", Priority::High));

        let pending = inbox.pending_for("writer", Utc::now());
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].priority, Priority::Urgent);
        assert!(inbox.pending_for("nobody", Utc::now()).is_empty());
    }

    #[test]
    fn test_overdue_handoff_cannot_be_taken() {
        let inbox = HandoffBox::new();
        let mut h = handoff("writer", Priority::High);
        h.deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = h.id;
        inbox.insert(h);

        assert!(inbox.pending_for("writer", Utc::now()).is_empty());
        assert!(matches!(
            inbox.take(id, Utc::now()),
            Err(MaestroError::Timeout(_))
        ));
    }

    #[test]
    fn test_purge_overdue() {
        let inbox = HandoffBox::new();
        let mut late = handoff("writer", Priority::Low);
        late.deadline = Some(Utc::now());
        inbox.insert(late);
        inbox.insert(handoff("writer", Priority::Low));
        assert_eq!(inbox.purge_overdue(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert_eq!(inbox.len(), 1);
    }
}
