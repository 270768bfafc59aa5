//! Executor used by `maestro run` in place of real agents.

use async_trait::async_trait;
use maestro_core::{ExecutorResponse, ExecutorTask, MaestroResult, TaskExecutor};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Replies to every task with its own input, after an optional delay.
pub struct EchoExecutor {
    agent_type: String,
    delay: Duration,
}

impl EchoExecutor {
    pub fn new(agent_type: impl Into<String>, delay: Duration) -> Self {
        Self {
            agent_type: agent_type.into(),
            delay,
        }
    }
}

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
        debug!(
            agent_type = %self.agent_type,
            task_id = %task.id,
            task_type = %task.task_type,
            "Echo executor handling task"
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ExecutorResponse::success(json!({
            "agent_type": self.agent_type,
            "task_type": task.task_type,
            "echo": task.input_data,
        })))
    }
}
