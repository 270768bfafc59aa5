use chrono::{DateTime, Utc};
use maestro_core::{ExecutorTask, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Typed payload of a queued task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    /// What the agent should do (passed to the executor as `type`).
    pub task_type: String,
    /// Organization the work is done for.
    pub org_id: String,
    /// Task input.
    #[serde(default)]
    pub input_data: serde_json::Value,
    /// Anything outside the recognized keys above.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskPayload {
    /// Payload with no extra metadata.
    pub fn new(
        task_type: impl Into<String>,
        org_id: impl Into<String>,
        input_data: serde_json::Value,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            org_id: org_id.into(),
            input_data,
            metadata: HashMap::new(),
        }
    }
}

/// Lifecycle of a task in the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Queued,
    /// Held by an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Out of retries or past its deadline.
    Failed,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A unit of work submitted to the coordinator for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: Uuid,
    /// Agent type that can run the task.
    pub agent_type: String,
    /// Dispatch priority.
    pub priority: Priority,
    /// What to run.
    pub payload: TaskPayload,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Queued tasks past this fail without being dispatched.
    pub deadline: Option<DateTime<Utc>>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Attempts allowed before the task fails.
    pub max_retries: u32,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Agents advertising this capability are preferred when dispatching.
    #[serde(default)]
    pub required_capability: Option<String>,
    /// Agent holding the task.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    /// Start of the current attempt.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Executor result on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Last failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    /// A queued task with the default retry budget.
    pub fn new(agent_type: impl Into<String>, payload: TaskPayload, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            priority,
            payload,
            created_at: Utc::now(),
            deadline: None,
            retry_count: 0,
            max_retries: 3,
            status: TaskStatus::Queued,
            required_capability: None,
            assigned_agent: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Fail the task if it is still queued at `deadline`.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Prefer agents advertising `capability`.
    pub fn with_required_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capability = Some(capability.into());
        self
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// The request handed to the executor for this task.
    pub fn to_executor_task(&self) -> ExecutorTask {
        ExecutorTask::new(
            self.id.to_string(),
            &self.payload.task_type,
            &self.payload.org_id,
            self.payload.input_data.clone(),
        )
        .with_metadata(self.payload.metadata.clone())
    }
}

/// Availability of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready for work.
    Idle,
    /// Running a task.
    Busy,
    /// Reported a failure; not dispatched to.
    Error,
    /// Missed heartbeats; not dispatched to.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Counters tracked per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Tasks this agent completed.
    pub tasks_completed: u64,
    /// Attempts this agent failed.
    pub tasks_failed: u64,
    /// Total execution time in milliseconds.
    pub duration_ms: u64,
}

/// A worker registered with the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent id.
    pub agent_id: String,
    /// Agent type, matched against task types.
    pub agent_type: String,
    /// Current state.
    pub status: AgentStatus,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// Task the agent holds, if any.
    pub current_task_id: Option<Uuid>,
    /// Last heartbeat or registration.
    pub last_heartbeat: DateTime<Utc>,
    /// Per-agent counters.
    #[serde(default)]
    pub metrics: AgentMetrics,
}

impl AgentInfo {
    /// An idle agent that heartbeated just now.
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            status: AgentStatus::Idle,
            capabilities,
            current_task_id: None,
            last_heartbeat: Utc::now(),
            metrics: AgentMetrics::default(),
        }
    }

    /// Whether the agent advertises `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Whether the agent can take `task` right now.
    pub fn can_take(&self, task: &Task) -> bool {
        self.status == AgentStatus::Idle && self.agent_type == task.agent_type
    }
}
