use crate::{MaestroError, MaestroResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The unit of work handed to an agent through the [`TaskExecutor`] contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorTask {
    /// Task id, unique per dispatch target.
    pub id: String,
    /// What the agent should do.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Organization the work is done for.
    pub org_id: String,
    /// Task input.
    pub input_data: serde_json::Value,
    /// Keys outside the recognized set travel here instead of in `input_data`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutorTask {
    /// Build a task with empty metadata.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        org_id: impl Into<String>,
        input_data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            org_id: org_id.into(),
            input_data,
            metadata: HashMap::new(),
        }
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured reply from an executor. Expected failures are reported here
/// with `success == false`, not as an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResponse {
    /// Whether the task succeeded.
    pub success: bool,
    /// Task output; `null` on failure.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Failure reason when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Self-reported confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl ExecutorResponse {
    /// A successful response carrying `result`.
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            confidence: default_confidence(),
        }
    }

    /// A failed response carrying a human-readable error.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: serde_json::Value::Null,
            error: Some(error.into()),
            confidence: 0.0,
        }
    }

    /// Set the reported confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Contract every agent implements to accept and run a task.
///
/// Implementations must tolerate being cancelled at any await point, since
/// callers enforce timeouts by dropping the returned future.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `task` to completion and report the outcome.
    async fn execute(&self, task: ExecutorTask) -> MaestroResult<ExecutorResponse>;
}

/// What happened to a single executor call made through [`run_with_timeout`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorOutcome {
    /// The executor succeeded with this result.
    Success(serde_json::Value),
    /// The executor failed or returned `Err`.
    Failure(String),
    /// No reply before the deadline.
    TimedOut,
}

impl ExecutorOutcome {
    /// Classify a raw executor result. `Err` counts as a failure.
    pub fn from_result(result: MaestroResult<ExecutorResponse>) -> Self {
        match result {
            Ok(response) if response.success => ExecutorOutcome::Success(response.result),
            Ok(response) => ExecutorOutcome::Failure(
                response
                    .error
                    .unwrap_or_else(|| "executor reported failure".to_string()),
            ),
            Err(e) => ExecutorOutcome::Failure(e.to_string()),
        }
    }

    /// True for [`ExecutorOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutorOutcome::Success(_))
    }

    /// Error text for failed or timed-out outcomes.
    pub fn error_message(&self, timeout: Duration) -> Option<String> {
        match self {
            ExecutorOutcome::Success(_) => None,
            ExecutorOutcome::Failure(e) => Some(e.clone()),
            ExecutorOutcome::TimedOut => {
                Some(format!("timed out after {}ms", timeout.as_millis()))
            }
        }
    }
}

/// Invoke `executor` with a deadline. Dropping the in-flight call on timeout
/// cancels only this call.
pub async fn run_with_timeout(
    executor: &dyn TaskExecutor,
    task: ExecutorTask,
    timeout: Duration,
) -> ExecutorOutcome {
    match tokio::time::timeout(timeout, executor.execute(task)).await {
        Ok(result) => ExecutorOutcome::from_result(result),
        Err(_) => ExecutorOutcome::TimedOut,
    }
}

/// Maps agent types to the executor that serves them.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the executor for `agent_type`.
    pub fn register(&self, agent_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let agent_type = agent_type.into();
        let replaced = self
            .executors
            .write()
            .insert(agent_type.clone(), executor)
            .is_some();
        if replaced {
            warn!(agent_type = %agent_type, "Replaced executor");
        } else {
            info!(agent_type = %agent_type, "Registered executor");
        }
    }

    /// Executor for `agent_type`, if any.
    pub fn get(&self, agent_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.read().get(agent_type).cloned()
    }

    /// Like [`get`](Self::get) but reports a missing executor as an error.
    pub fn require(&self, agent_type: &str) -> MaestroResult<Arc<dyn TaskExecutor>> {
        self.get(agent_type).ok_or_else(|| {
            MaestroError::NotFound(format!("no executor registered for agent type '{agent_type}'"))
        })
    }

    /// Whether an executor serves `agent_type`.
    pub fn contains(&self, agent_type: &str) -> bool {
        self.executors.read().contains_key(agent_type)
    }

    /// Registered agent types, sorted.
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered agent types.
    pub fn len(&self) -> usize {
        self.executors.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.executors.read().is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(ExecutorResponse);

    #[async_trait]
    impl TaskExecutor for Fixed {
        async fn execute(&self, _task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
            Ok(self.0.clone())
        }
    }

    struct Erroring;

    #[async_trait]
    impl TaskExecutor for Erroring {
        async fn execute(&self, _task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
            Err(MaestroError::Executor("backend down".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl TaskExecutor for Slow {
        async fn execute(&self, _task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExecutorResponse::success(json!("late")))
        }
    }

    fn task() -> ExecutorTask {
        ExecutorTask::new("t-1", "analyze", "org-1", json!({"q": 1}))
    }

    #[tokio::test]
    async fn test_success_outcome() {
        let exec = Fixed(ExecutorResponse::success(json!({"ok": true})));
        let outcome = run_with_timeout(&exec, task(), Duration::from_secs(1)).await;
        assert_eq!(outcome, ExecutorOutcome::Success(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_failure_response_is_failure_outcome() {
        let exec = Fixed(ExecutorResponse::failure("bad input"));
        let outcome = run_with_timeout(&exec, task(), Duration::from_secs(1)).await;
        assert_eq!(outcome, ExecutorOutcome::Failure("bad input".into()));
    }

    #[tokio::test]
    async fn test_error_is_failure_outcome() {
        let outcome = run_with_timeout(&Erroring, task(), Duration::from_secs(1)).await;
        assert!(matches!(outcome, ExecutorOutcome::Failure(ref e) if e.contains("backend down")));
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let timeout = Duration::from_millis(20);
        let outcome = run_with_timeout(&Slow, task(), timeout).await;
        assert_eq!(outcome, ExecutorOutcome::TimedOut);
        assert_eq!(outcome.error_message(timeout).unwrap(), "timed out after 20ms");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        registry.register("writer", Arc::new(Slow));
        registry.register("analyst", Arc::new(Erroring));
        assert!(registry.contains("writer"));
        assert_eq!(registry.agent_types(), vec!["analyst", "writer"]);
        assert!(registry.require("missing").is_err());
    }

    #[test]
    fn test_task_wire_field_names() {
        let json = serde_json::to_value(task()).unwrap();
        assert_eq!(json["type"], "analyze");
        assert_eq!(json["org_id"], "org-1");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let resp = ExecutorResponse::success(json!(null)).with_confidence(1.7);
        assert_eq!(resp.confidence, 1.0);
    }
}
