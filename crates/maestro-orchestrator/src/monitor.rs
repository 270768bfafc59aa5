use crate::types::{AgentInfo, AgentStatus};
use serde::{Deserialize, Serialize};

/// Aggregate coordinator counters, as returned by `Coordinator::get_metrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    /// Tasks accepted by `submit`.
    pub tasks_submitted: u64,
    /// Tasks that finished successfully.
    pub tasks_completed: u64,
    /// Tasks that ran out of retries or missed their deadline.
    pub tasks_failed: u64,
    /// Failed attempts that were put back in the queue.
    pub tasks_retried: u64,
    /// Tasks taken back from an agent that went offline or was unregistered.
    pub tasks_requeued: u64,
    /// Tasks flagged by the liveness monitor as running too long.
    pub tasks_stuck: u64,
    /// Mean duration of finished executions.
    pub average_execution_ms: f64,
    /// Tasks waiting in the queue.
    pub queue_length: usize,
    /// Tasks held by agents.
    pub running_tasks: usize,
    /// Registered agents.
    pub agents_total: usize,
    /// Agents ready for work.
    pub agents_idle: usize,
    /// Agents running a task.
    pub agents_busy: usize,
    /// Agents that reported an error.
    pub agents_error: usize,
    /// Agents that stopped heartbeating.
    pub agents_offline: usize,
}

/// Running counters owned by the coordinator state.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    submitted: u64,
    completed: u64,
    failed: u64,
    retried: u64,
    requeued: u64,
    stuck: u64,
    execution_ms_total: u64,
    executions_timed: u64,
}

impl MetricsRecorder {
    pub(crate) fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    pub(crate) fn record_completed(&mut self, duration_ms: u64) {
        self.completed += 1;
        self.record_duration(duration_ms);
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn record_retry(&mut self) {
        self.retried += 1;
    }

    pub(crate) fn record_requeue(&mut self) {
        self.requeued += 1;
    }

    pub(crate) fn record_stuck(&mut self) {
        self.stuck += 1;
    }

    pub(crate) fn record_duration(&mut self, duration_ms: u64) {
        self.execution_ms_total += duration_ms;
        self.executions_timed += 1;
    }

    pub(crate) fn snapshot<'a>(
        &self,
        queue_length: usize,
        running_tasks: usize,
        agents: impl Iterator<Item = &'a AgentInfo>,
    ) -> CoordinatorMetrics {
        let mut metrics = CoordinatorMetrics {
            tasks_submitted: self.submitted,
            tasks_completed: self.completed,
            tasks_failed: self.failed,
            tasks_retried: self.retried,
            tasks_requeued: self.requeued,
            tasks_stuck: self.stuck,
            average_execution_ms: if self.executions_timed == 0 {
                0.0
            } else {
                self.execution_ms_total as f64 / self.executions_timed as f64
            },
            queue_length,
            running_tasks,
            ..CoordinatorMetrics::default()
        };
        for agent in agents {
            metrics.agents_total += 1;
            match agent.status {
                AgentStatus::Idle => metrics.agents_idle += 1,
                AgentStatus::Busy => metrics.agents_busy += 1,
                AgentStatus::Error => metrics.agents_error += 1,
                AgentStatus::Offline => metrics.agents_offline += 1,
            }
        }
        metrics
    }
}
