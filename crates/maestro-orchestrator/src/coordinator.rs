use crate::monitor::{CoordinatorMetrics, MetricsRecorder};
use crate::task_queue::TaskQueue;
use crate::types::{AgentInfo, AgentStatus, Task, TaskPayload, TaskStatus};
use chrono::{DateTime, Utc};
use maestro_bus::{AgentMessage, CommunicationBus};
use maestro_core::{
    CoordinatorConfig, ExecutorOutcome, ExecutorRegistry, MaestroError, MaestroResult, Priority,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sender id used for coordinator status events on the bus.
pub const COORDINATOR_SENDER: &str = "coordinator";

/// Snapshot returned by [`Coordinator::get_queue_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tasks waiting for an agent.
    pub queue_length: usize,
    /// Tasks currently held by an agent.
    pub running: usize,
    /// Retained completed tasks.
    pub completed: usize,
    /// Retained failed tasks.
    pub failed: usize,
    /// Queued tasks per priority.
    pub by_priority: BTreeMap<Priority, usize>,
    /// Queued tasks in dispatch order.
    pub queued_tasks: Vec<Task>,
    /// Tasks currently held by an agent.
    pub running_tasks: Vec<Task>,
    /// Terminally failed tasks, oldest first, each with its error and retry count.
    pub failed_tasks: Vec<Task>,
}

/// What one liveness pass changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivenessReport {
    /// Tasks that ran past the execution ceiling.
    pub stuck_tasks: Vec<Uuid>,
    /// Agents marked offline in this pass.
    pub offline_agents: Vec<String>,
}

struct Assignment {
    task: Task,
    agent_id: String,
    /// `retry_count` at dispatch time; late results from older attempts are dropped.
    attempt: u32,
    started: Instant,
    abort: AbortHandle,
}

struct CoordinatorState {
    queue: TaskQueue,
    agents: HashMap<String, AgentInfo>,
    running: HashMap<Uuid, Assignment>,
    completed: VecDeque<Task>,
    failed: VecDeque<Task>,
    metrics: MetricsRecorder,
    max_finished: usize,
}

impl CoordinatorState {
    /// Route a failed attempt: back to the front of its band while retries
    /// remain, otherwise to the failed list.
    fn fail_attempt(&mut self, mut task: Task, error: String, events: &mut Vec<serde_json::Value>) {
        task.retry_count += 1;
        task.error = Some(error.clone());
        task.assigned_agent = None;
        task.started_at = None;

        if task.retry_count < task.max_retries {
            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error = %error,
                "Task failed, requeueing"
            );
            self.metrics.record_retry();
            events.push(task_event("task_retry", &task, None));
            self.queue.push_front(task);
        } else {
            error!(
                task_id = %task.id,
                retry_count = task.retry_count,
                error = %error,
                "Task failed permanently"
            );
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            self.metrics.record_failed();
            events.push(task_event("task_failed", &task, None));
            push_bounded(&mut self.failed, task, self.max_finished);
        }
    }

    /// Take the running task away from `agent_id`, if any, and send it
    /// through the retry path.
    fn reclaim_task(&mut self, agent_id: &str, reason: String, events: &mut Vec<serde_json::Value>) {
        let task_id = match self.agents.get_mut(agent_id) {
            Some(agent) => agent.current_task_id.take(),
            None => None,
        };
        let Some(task_id) = task_id else {
            return;
        };
        if let Some(assignment) = self.running.remove(&task_id) {
            assignment.abort.abort();
            self.metrics.record_requeue();
            self.fail_attempt(assignment.task, reason, events);
        }
    }

    fn find_task(&self, id: Uuid) -> Option<Task> {
        if let Some(task) = self.queue.get(id) {
            return Some(task.clone());
        }
        if let Some(assignment) = self.running.get(&id) {
            return Some(assignment.task.clone());
        }
        self.completed
            .iter()
            .chain(self.failed.iter())
            .find(|t| t.id == id)
            .cloned()
    }
}

struct Background {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Registers agents, queues tasks by priority and hands them to idle agents.
///
/// The queue, the agent registry and the in-flight table live behind a
/// single lock, so every operation observes and leaves a consistent state.
pub struct Coordinator {
    config: CoordinatorConfig,
    executors: Arc<ExecutorRegistry>,
    bus: Option<Arc<CommunicationBus>>,
    state: Mutex<CoordinatorState>,
    wake: Notify,
    background: parking_lot::Mutex<Option<Background>>,
}

impl Coordinator {
    /// A stopped coordinator with no agents.
    pub fn new(config: CoordinatorConfig, executors: Arc<ExecutorRegistry>) -> Self {
        let max_finished = config.max_finished_tasks;
        Self {
            config,
            executors,
            bus: None,
            state: Mutex::new(CoordinatorState {
                queue: TaskQueue::new(),
                agents: HashMap::new(),
                running: HashMap::new(),
                completed: VecDeque::new(),
                failed: VecDeque::new(),
                metrics: MetricsRecorder::default(),
                max_finished,
            }),
            wake: Notify::new(),
            background: parking_lot::Mutex::new(None),
        }
    }

    /// Publish status events to `bus`.
    pub fn with_bus(mut self, bus: Arc<CommunicationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Settings the coordinator was built with.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // --- Lifecycle ---

    /// Spawn the dispatch loop and the liveness monitor. No-op if running.
    pub fn start(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if background.is_some() {
            return;
        }
        let token = CancellationToken::new();

        let this = Arc::clone(self);
        let cancel = token.clone();
        let dispatch = tokio::spawn(async move {
            loop {
                this.dispatch_pending().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = this.wake.notified() => {}
                    _ = tokio::time::sleep(this.config.dispatch_interval()) => {}
                }
            }
            debug!("Dispatch loop stopped");
        });

        let this = Arc::clone(self);
        let cancel = token.clone();
        let monitor = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        this.check_liveness().await;
                    }
                }
            }
            debug!("Liveness monitor stopped");
        });

        *background = Some(Background {
            token,
            handles: vec![dispatch, monitor],
        });
        info!(
            dispatch_interval_ms = self.config.dispatch_interval_ms,
            heartbeat_interval_secs = self.config.heartbeat_interval_secs,
            "Coordinator started"
        );
    }

    /// Stop the background loops. Tasks already handed to an executor keep
    /// running and still report back.
    pub async fn stop(&self) {
        let background = self.background.lock().take();
        if let Some(background) = background {
            background.token.cancel();
            for handle in background.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Coordinator background task ended abnormally");
                }
            }
            info!("Coordinator stopped");
        }
    }

    /// Whether the background loops are running.
    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    // --- Agents ---

    /// Register an agent, or refresh its capabilities and heartbeat if it is
    /// already known.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: Vec<String>,
    ) -> MaestroResult<()> {
        if agent_id.trim().is_empty() || agent_type.trim().is_empty() {
            return Err(MaestroError::Validation(
                "agent id and agent type must not be empty".into(),
            ));
        }
        self.executors.require(agent_type)?;

        let event = {
            let mut state = self.state.lock().await;
            match state.agents.get_mut(agent_id) {
                Some(existing) => {
                    if existing.agent_type != agent_type {
                        if existing.status == AgentStatus::Busy {
                            return Err(MaestroError::Coordinator(format!(
                                "agent '{agent_id}' is busy and cannot change type"
                            )));
                        }
                        existing.agent_type = agent_type.to_string();
                    }
                    existing.capabilities = capabilities;
                    existing.last_heartbeat = Utc::now();
                    if matches!(existing.status, AgentStatus::Offline | AgentStatus::Error)
                        && existing.current_task_id.is_none()
                    {
                        existing.status = AgentStatus::Idle;
                        info!(agent_id, "Agent back online after re-registration");
                    }
                    debug!(agent_id, "Agent re-registered");
                    agent_event("agent_updated", existing)
                }
                None => {
                    let agent = AgentInfo::new(agent_id, agent_type, capabilities);
                    let event = agent_event("agent_registered", &agent);
                    state.agents.insert(agent_id.to_string(), agent);
                    info!(agent_id, agent_type, "Agent registered");
                    event
                }
            }
        };

        if let Some(bus) = &self.bus {
            bus.register_agent(agent_id)?;
        }
        self.publish(vec![event]);
        self.wake.notify_one();
        Ok(())
    }

    /// Remove an agent. A task it was running goes back to the queue.
    /// Returns whether the agent was registered.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            if !state.agents.contains_key(agent_id) {
                return false;
            }
            state.reclaim_task(agent_id, format!("agent '{agent_id}' was unregistered"), &mut events);
            if let Some(agent) = state.agents.remove(agent_id) {
                events.push(agent_event("agent_unregistered", &agent));
            }
        }
        if let Some(bus) = &self.bus {
            bus.unregister_agent(agent_id);
        }
        info!(agent_id, "Agent unregistered");
        self.publish(events);
        self.wake.notify_one();
        true
    }

    /// Record a heartbeat. An offline agent with no task becomes idle again.
    pub async fn heartbeat(&self, agent_id: &str) -> MaestroResult<()> {
        let event = {
            let mut state = self.state.lock().await;
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| MaestroError::NotFound(format!("agent '{agent_id}'")))?;
            agent.last_heartbeat = Utc::now();
            if agent.status == AgentStatus::Offline && agent.current_task_id.is_none() {
                agent.status = AgentStatus::Idle;
                info!(agent_id, "Agent back online");
                Some(agent_event("agent_online", agent))
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.publish(vec![event]);
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Status-update entry point for agents. `Busy` is owned by the dispatcher
    /// and cannot be set here; moving a busy agent to `Error` or `Offline`
    /// requeues its task.
    pub async fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> MaestroResult<()> {
        if status == AgentStatus::Busy {
            return Err(MaestroError::Validation(
                "agents become busy only through dispatch".into(),
            ));
        }
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let agent = state
                .agents
                .get(agent_id)
                .ok_or_else(|| MaestroError::NotFound(format!("agent '{agent_id}'")))?;
            let current = agent.current_task_id;
            if let Some(task_id) = current {
                if status == AgentStatus::Idle {
                    return Err(MaestroError::Coordinator(format!(
                        "agent '{agent_id}' is still running task {task_id}"
                    )));
                }
                state.reclaim_task(agent_id, format!("agent '{agent_id}' reported {status}"), &mut events);
            }
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.status = status;
                agent.last_heartbeat = Utc::now();
                events.push(agent_event("agent_status", agent));
            }
        }
        info!(agent_id, status = %status, "Agent status updated");
        self.publish(events);
        self.wake.notify_one();
        Ok(())
    }

    // --- Tasks ---

    /// Queue a task with the configured default retry budget.
    pub async fn submit_task(
        &self,
        agent_type: &str,
        payload: TaskPayload,
        priority: Priority,
        deadline: Option<DateTime<Utc>>,
    ) -> MaestroResult<Uuid> {
        let mut task = Task::new(agent_type, payload, priority)
            .with_max_retries(self.config.default_max_retries);
        task.deadline = deadline;
        self.submit(task).await
    }

    /// Queue a fully built task.
    pub async fn submit(&self, mut task: Task) -> MaestroResult<Uuid> {
        if task.agent_type.trim().is_empty() {
            return Err(MaestroError::Validation("agent type must not be empty".into()));
        }
        task.status = TaskStatus::Queued;
        task.assigned_agent = None;
        let event = task_event("task_submitted", &task, None);
        let id = {
            let mut state = self.state.lock().await;
            state.metrics.record_submitted();
            state.queue.push(task)
        };
        debug!(task_id = %id, "Task submitted");
        self.publish(vec![event]);
        self.wake.notify_one();
        Ok(id)
    }

    /// One dispatch pass: fail overdue tasks, then hand every dispatchable
    /// task to an idle agent in priority order. Tasks whose agent type has no
    /// idle agent are skipped, not waited on. Returns how many were dispatched.
    pub async fn dispatch_pending(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let mut events = Vec::new();
        let dispatched = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            for mut task in state.queue.take_where(|t| t.is_overdue_at(now)) {
                warn!(task_id = %task.id, "Task deadline exceeded before dispatch");
                task.status = TaskStatus::Failed;
                task.error = Some("deadline exceeded".to_string());
                task.completed_at = Some(now);
                state.metrics.record_failed();
                events.push(task_event("task_failed", &task, None));
                push_bounded(&mut state.failed, task, state.max_finished);
            }

            let agents = &mut state.agents;
            let mut picks: HashMap<Uuid, String> = HashMap::new();
            let taken = state.queue.take_where(|task| {
                let Some(agent_id) = pick_idle_agent(agents, task) else {
                    return false;
                };
                if let Some(agent) = agents.get_mut(&agent_id) {
                    agent.status = AgentStatus::Busy;
                    agent.current_task_id = Some(task.id);
                }
                picks.insert(task.id, agent_id);
                true
            });

            let count = taken.len();
            for mut task in taken {
                let Some(agent_id) = picks.remove(&task.id) else {
                    continue;
                };
                task.status = TaskStatus::Running;
                task.assigned_agent = Some(agent_id.clone());
                task.started_at = Some(now);
                events.push(task_event("task_assigned", &task, Some(&agent_id)));
                info!(
                    task_id = %task.id,
                    agent_id = %agent_id,
                    priority = %task.priority,
                    retry_count = task.retry_count,
                    "Task dispatched"
                );

                let abort = self.spawn_execution(&task, &agent_id);
                state.running.insert(
                    task.id,
                    Assignment {
                        attempt: task.retry_count,
                        task,
                        agent_id,
                        started: Instant::now(),
                        abort,
                    },
                );
            }
            count
        };
        self.publish(events);
        dispatched
    }

    fn spawn_execution(self: &Arc<Self>, task: &Task, agent_id: &str) -> AbortHandle {
        let this = Arc::clone(self);
        let task_id = task.id;
        let attempt = task.retry_count;
        let agent_id = agent_id.to_string();
        let request = task.to_executor_task();
        let executor = self.executors.require(&task.agent_type);
        let handle = tokio::spawn(async move {
            let outcome = match executor {
                Ok(executor) => ExecutorOutcome::from_result(executor.execute(request).await),
                Err(e) => ExecutorOutcome::Failure(e.to_string()),
            };
            this.complete_task(task_id, &agent_id, attempt, outcome).await;
        });
        handle.abort_handle()
    }

    /// Apply an executor result. Results for attempts the coordinator has
    /// already reclaimed are discarded.
    async fn complete_task(&self, task_id: Uuid, agent_id: &str, attempt: u32, outcome: ExecutorOutcome) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let current = state
                .running
                .get(&task_id)
                .is_some_and(|a| a.agent_id == agent_id && a.attempt == attempt);
            if !current {
                debug!(task_id = %task_id, agent_id, "Discarding stale task result");
                return;
            }
            let Some(assignment) = state.running.remove(&task_id) else {
                return;
            };
            let elapsed_ms = u64::try_from(assignment.started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if let Some(agent) = state.agents.get_mut(agent_id) {
                if agent.current_task_id == Some(task_id) {
                    agent.current_task_id = None;
                    if agent.status == AgentStatus::Busy {
                        agent.status = AgentStatus::Idle;
                    }
                }
                agent.metrics.duration_ms += elapsed_ms;
                if outcome.is_success() {
                    agent.metrics.tasks_completed += 1;
                } else {
                    agent.metrics.tasks_failed += 1;
                }
            }

            let mut task = assignment.task;
            match outcome {
                ExecutorOutcome::Success(result) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    task.error = None;
                    task.completed_at = Some(Utc::now());
                    state.metrics.record_completed(elapsed_ms);
                    info!(task_id = %task_id, agent_id, duration_ms = elapsed_ms, "Task completed");
                    events.push(task_event("task_completed", &task, Some(agent_id)));
                    let max = state.max_finished;
                    push_bounded(&mut state.completed, task, max);
                }
                failure => {
                    let error = failure
                        .error_message(self.config.task_timeout())
                        .unwrap_or_default();
                    state.metrics.record_duration(elapsed_ms);
                    state.fail_attempt(task, error, &mut events);
                }
            }
        }
        self.publish(events);
        self.wake.notify_one();
    }

    /// Run one liveness pass now.
    pub async fn check_liveness(&self) -> LivenessReport {
        self.check_liveness_at(Utc::now()).await
    }

    /// Flag tasks running longer than the task ceiling and agents silent
    /// longer than the heartbeat window, as of `now`.
    pub async fn check_liveness_at(&self, now: DateTime<Utc>) -> LivenessReport {
        let task_ceiling = to_chrono(self.config.task_timeout());
        let heartbeat_window = to_chrono(self.config.heartbeat_timeout());
        let mut report = LivenessReport::default();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;

            let stuck: Vec<(Uuid, String)> = state
                .running
                .iter()
                .filter(|(_, a)| a.task.started_at.is_some_and(|s| now - s > task_ceiling))
                .map(|(id, a)| (*id, a.agent_id.clone()))
                .collect();
            for (task_id, agent_id) in stuck {
                let Some(assignment) = state.running.remove(&task_id) else {
                    continue;
                };
                assignment.abort.abort();
                state.metrics.record_stuck();
                warn!(task_id = %task_id, agent_id = %agent_id, "Task exceeded execution ceiling");
                if let Some(agent) = state.agents.get_mut(&agent_id) {
                    agent.current_task_id = None;
                    agent.metrics.tasks_failed += 1;
                    if now - agent.last_heartbeat > heartbeat_window {
                        agent.status = AgentStatus::Offline;
                        report.offline_agents.push(agent_id.clone());
                        events.push(agent_event("agent_offline", agent));
                    } else if agent.status == AgentStatus::Busy {
                        agent.status = AgentStatus::Idle;
                    }
                }
                report.stuck_tasks.push(task_id);
                state.fail_attempt(
                    assignment.task,
                    format!(
                        "task exceeded execution ceiling of {}s",
                        self.config.task_timeout_secs
                    ),
                    &mut events,
                );
            }

            let silent: Vec<String> = state
                .agents
                .values()
                .filter(|a| a.status != AgentStatus::Offline)
                .filter(|a| now - a.last_heartbeat > heartbeat_window)
                .map(|a| a.agent_id.clone())
                .collect();
            for agent_id in silent {
                warn!(agent_id = %agent_id, "Agent missed heartbeats, marking offline");
                state.reclaim_task(
                    &agent_id,
                    format!("agent '{agent_id}' went offline"),
                    &mut events,
                );
                if let Some(agent) = state.agents.get_mut(&agent_id) {
                    agent.status = AgentStatus::Offline;
                    events.push(agent_event("agent_offline", agent));
                }
                report.offline_agents.push(agent_id);
            }
        }
        self.publish(events);
        if !report.stuck_tasks.is_empty() {
            self.wake.notify_one();
        }
        report
    }

    // --- Snapshots ---

    /// Latest known state of a task, wherever it is.
    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.state.lock().await.find_task(task_id)
    }

    /// All registered agents, sorted by id.
    pub async fn get_agent_status(&self) -> Vec<AgentInfo> {
        let state = self.state.lock().await;
        let mut agents: Vec<AgentInfo> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// One agent by id.
    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.state.lock().await.agents.get(agent_id).cloned()
    }

    /// Queue, running and terminal task lists.
    pub async fn get_queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        let mut running_tasks: Vec<Task> = state.running.values().map(|a| a.task.clone()).collect();
        running_tasks.sort_by_key(|t| t.started_at);
        QueueStatus {
            queue_length: state.queue.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            by_priority: state.queue.len_by_priority(),
            queued_tasks: state.queue.iter().cloned().collect(),
            running_tasks,
            failed_tasks: state.failed.iter().cloned().collect(),
        }
    }

    /// Aggregate counters.
    pub async fn get_metrics(&self) -> CoordinatorMetrics {
        let state = self.state.lock().await;
        state
            .metrics
            .snapshot(state.queue.len(), state.running.len(), state.agents.values())
    }

    fn publish(&self, events: Vec<serde_json::Value>) {
        let Some(bus) = &self.bus else {
            return;
        };
        for event in events {
            let mut message = AgentMessage::status_update(COORDINATOR_SENDER, event);
            if let Some(task_id) = message.payload.get("task_id").and_then(|v| v.as_str()) {
                message.correlation_id = Some(task_id.to_string());
            }
            if let Err(e) = bus.send(message) {
                warn!(error = %e, "Failed to publish coordinator event");
            }
        }
    }
}

/// Choose an idle agent for `task`: capability match first, then the agent
/// that has handled the fewest tasks, then by id.
fn pick_idle_agent(agents: &HashMap<String, AgentInfo>, task: &Task) -> Option<String> {
    let matches_capability = |agent: &AgentInfo| {
        task.required_capability
            .as_deref()
            .map_or(true, |cap| agent.has_capability(cap))
    };
    let load = |agent: &AgentInfo| agent.metrics.tasks_completed + agent.metrics.tasks_failed;
    agents
        .values()
        .filter(|agent| agent.can_take(task))
        .min_by(|a, b| {
            matches_capability(b)
                .cmp(&matches_capability(a))
                .then_with(|| load(a).cmp(&load(b)))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        })
        .map(|agent| agent.agent_id.clone())
}

fn push_bounded(list: &mut VecDeque<Task>, task: Task, max: usize) {
    list.push_back(task);
    while list.len() > max {
        list.pop_front();
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn task_event(event: &str, task: &Task, agent_id: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "task_id": task.id.to_string(),
        "agent_type": task.agent_type,
        "agent_id": agent_id.or(task.assigned_agent.as_deref()),
        "priority": task.priority,
        "status": task.status,
        "retry_count": task.retry_count,
        "error": task.error,
    })
}

fn agent_event(event: &str, agent: &AgentInfo) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "agent_id": agent.agent_id,
        "agent_type": agent.agent_type,
        "status": agent.status,
    })
}
