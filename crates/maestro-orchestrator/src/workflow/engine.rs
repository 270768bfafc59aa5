use super::definition::{WorkflowDefinition, WorkflowStep, WorkflowSummary};
use super::execution::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, FailureKind, StepStatus,
    WorkflowExecution,
};
use super::templates::default_workflows;
use maestro_bus::{AgentMessage, CommunicationBus};
use maestro_core::{
    run_with_timeout, EngineConfig, ExecutorOutcome, ExecutorRegistry, ExecutorTask,
    MaestroError, MaestroResult, TaskExecutor,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sender id used for engine events and shared results on the bus.
pub const ENGINE_SENDER: &str = "workflow_engine";

type SharedExecution = Arc<Mutex<WorkflowExecution>>;

struct ActiveExecution {
    execution: SharedExecution,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Everything one step needs to run detached from the engine.
struct StepJob {
    index: usize,
    step: WorkflowStep,
    input: Value,
    execution_id: Uuid,
    workflow_id: String,
    org_id: String,
    executor: MaestroResult<Arc<dyn TaskExecutor>>,
    timeout: Duration,
    retry_delay: Duration,
}

struct StepReport {
    index: usize,
    outcome: ExecutorOutcome,
    timeout: Duration,
}

/// Runs workflow definitions as DAGs of steps, one wave of ready steps at a
/// time, with every step of a wave in flight concurrently.
pub struct WorkflowEngine {
    config: EngineConfig,
    executors: Arc<ExecutorRegistry>,
    bus: Option<Arc<CommunicationBus>>,
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    active: Mutex<HashMap<Uuid, ActiveExecution>>,
    history: Mutex<VecDeque<WorkflowExecution>>,
    shutdown: CancellationToken,
}

impl WorkflowEngine {
    /// An engine with no workflows and no bus.
    pub fn new(config: EngineConfig, executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            config,
            executors,
            bus: None,
            workflows: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish step results, final results and status events to `bus`.
    pub fn with_bus(mut self, bus: Arc<CommunicationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Definitions ---

    /// Validate and store a definition. Invalid definitions and ids that are
    /// already registered are rejected; a stored definition never changes.
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> MaestroResult<String> {
        if let Err(e) = definition.validate() {
            warn!(workflow_id = %definition.id, error = %e, "Rejected workflow definition");
            return Err(e);
        }
        for step in &definition.steps {
            if !self.executors.contains(&step.agent_type) {
                warn!(
                    workflow_id = %definition.id,
                    step_id = %step.id,
                    agent_type = %step.agent_type,
                    "No executor registered yet for step agent type"
                );
            }
        }

        let id = definition.id.clone();
        let steps = definition.steps.len();
        {
            let mut workflows = self.workflows.write();
            if workflows.contains_key(&id) {
                warn!(workflow_id = %id, "Rejected duplicate workflow id");
                return Err(MaestroError::Validation(format!(
                    "workflow '{id}' is already registered"
                )));
            }
            workflows.insert(id.clone(), Arc::new(definition));
        }
        info!(workflow_id = %id, steps, "Registered workflow");
        Ok(id)
    }

    /// Register the built-in templates.
    pub fn register_default_workflows(&self) -> MaestroResult<Vec<String>> {
        default_workflows()
            .into_iter()
            .map(|definition| self.register_workflow(definition))
            .collect()
    }

    /// A registered definition by id.
    pub fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.workflows
            .read()
            .get(workflow_id)
            .map(|definition| definition.as_ref().clone())
    }

    /// All registered workflows, sorted by id.
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .workflows
            .read()
            .values()
            .map(|definition| definition.summary())
            .collect();
        summaries.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        summaries
    }

    // --- Executions ---

    /// Start an execution in the background and return its id immediately.
    pub fn execute_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        input_data: Value,
        org_id: &str,
        user_id: Option<&str>,
    ) -> MaestroResult<Uuid> {
        if self.shutdown.is_cancelled() {
            return Err(MaestroError::Workflow("engine is shut down".into()));
        }
        let definition = self
            .workflows
            .read()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| MaestroError::NotFound(format!("workflow '{workflow_id}'")))?;

        let mut execution = WorkflowExecution::new(
            &definition,
            input_data,
            org_id,
            user_id.map(str::to_string),
        );
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(chrono::Utc::now());
        let id = execution.id;
        let shared = Arc::new(Mutex::new(execution));
        let cancel = self.shutdown.child_token();

        let mut active = self.active.lock();
        let handle = tokio::spawn({
            let this = Arc::clone(self);
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            async move { this.drive(id, shared, cancel).await }
        });
        active.insert(
            id,
            ActiveExecution {
                execution: shared,
                cancel,
                handle: Some(handle),
            },
        );
        info!(execution_id = %id, workflow_id, org_id, "Workflow execution started");
        Ok(id)
    }

    /// Latest state of an active or recently finished execution.
    pub fn get_execution_status(&self, execution_id: Uuid) -> MaestroResult<ExecutionSnapshot> {
        let active = self
            .active
            .lock()
            .get(&execution_id)
            .map(|a| Arc::clone(&a.execution));
        if let Some(execution) = active {
            return Ok(execution.lock().snapshot());
        }
        self.history
            .lock()
            .iter()
            .find(|e| e.id == execution_id)
            .map(WorkflowExecution::snapshot)
            .ok_or_else(|| MaestroError::NotFound(format!("execution {execution_id}")))
    }

    /// Stop scheduling new steps for an execution. Steps already in flight
    /// are not interrupted; their results are discarded. Returns `false` if
    /// the execution is unknown or already finished.
    pub fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let entry = self
            .active
            .lock()
            .get(&execution_id)
            .map(|a| (Arc::clone(&a.execution), a.cancel.clone()));
        let Some((execution, cancel)) = entry else {
            return false;
        };
        {
            let mut exec = execution.lock();
            if exec.status.is_terminal() {
                return false;
            }
            exec.finish(
                ExecutionStatus::Cancelled,
                Some("cancelled by caller".to_string()),
                None,
            );
        }
        cancel.cancel();
        info!(execution_id = %execution_id, "Workflow execution cancelled");
        true
    }

    /// Active executions followed by history, oldest first.
    pub fn list_executions(&self) -> Vec<ExecutionSummary> {
        let active: Vec<SharedExecution> = self
            .active
            .lock()
            .values()
            .map(|a| Arc::clone(&a.execution))
            .collect();
        let mut summaries: Vec<ExecutionSummary> =
            active.iter().map(|e| e.lock().summary()).collect();
        let active_ids: HashSet<Uuid> = summaries.iter().map(|s| s.execution_id).collect();
        summaries.extend(
            self.history
                .lock()
                .iter()
                .filter(|e| !active_ids.contains(&e.id))
                .map(WorkflowExecution::summary),
        );
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Cancel every active execution and wait for their drivers to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .active
            .lock()
            .values_mut()
            .filter_map(|a| a.handle.take())
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Workflow driver ended abnormally");
            }
        }
        info!("Workflow engine stopped");
    }

    // --- Driver ---

    async fn drive(
        self: Arc<Self>,
        id: Uuid,
        execution: SharedExecution,
        cancel: CancellationToken,
    ) {
        self.publish_event(&execution, "execution_started");

        let limit = self.config.execution_timeout();
        if tokio::time::timeout(limit, self.run_waves(&execution, &cancel))
            .await
            .is_err()
        {
            cancel.cancel();
            let mut exec = execution.lock();
            if !exec.status.is_terminal() {
                warn!(execution_id = %id, limit_secs = limit.as_secs(), "Workflow execution timed out");
                exec.finish(
                    ExecutionStatus::Failed,
                    Some(format!("execution timed out after {}s", limit.as_secs())),
                    Some(FailureKind::Timeout),
                );
            }
        }

        {
            let mut exec = execution.lock();
            if !exec.status.is_terminal() {
                exec.finish(
                    ExecutionStatus::Cancelled,
                    Some("workflow engine shut down".to_string()),
                    None,
                );
            }
        }

        self.retire(id, &execution);
    }

    async fn run_waves(&self, execution: &SharedExecution, cancel: &CancellationToken) {
        let (execution_id, workflow_id, org_id) = {
            let exec = execution.lock();
            (exec.id, exec.workflow_id.clone(), exec.org_id.clone())
        };

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let wave: Vec<StepJob> = {
                let mut exec = execution.lock();
                if exec.status.is_terminal() {
                    return;
                }
                let ready = exec.ready_steps();
                if ready.is_empty() {
                    if exec.has_pending() {
                        let pending: Vec<String> = exec
                            .steps
                            .iter()
                            .filter(|s| s.status == StepStatus::Pending)
                            .map(|s| s.step.id.clone())
                            .collect();
                        warn!(execution_id = %execution_id, ?pending, "Workflow execution stuck");
                        exec.finish(
                            ExecutionStatus::Failed,
                            Some(format!(
                                "execution stuck: no runnable step among pending [{}]",
                                pending.join(", ")
                            )),
                            Some(FailureKind::Stuck),
                        );
                    }
                    return;
                }
                ready
                    .into_iter()
                    .map(|index| {
                        let input = exec.begin_step(index);
                        let step = exec.steps[index].step.clone();
                        StepJob {
                            index,
                            executor: self.executors.require(&step.agent_type),
                            timeout: step
                                .timeout_secs
                                .map(Duration::from_secs)
                                .unwrap_or_else(|| self.config.default_step_timeout()),
                            retry_delay: self.config.retry_delay(),
                            step,
                            input,
                            execution_id,
                            workflow_id: workflow_id.clone(),
                            org_id: org_id.clone(),
                        }
                    })
                    .collect()
            };

            let mut set = JoinSet::new();
            for job in wave {
                debug!(execution_id = %execution_id, step_id = %job.step.id, "Step dispatched");
                set.spawn(run_step(job, Arc::clone(execution), cancel.clone()));
            }

            let mut failure: Option<(String, String)> = None;
            loop {
                let joined = tokio::select! {
                    _ = cancel.cancelled() => {
                        set.detach_all();
                        return;
                    }
                    joined = set.join_next() => joined,
                };
                match joined {
                    None => break,
                    Some(Ok(report)) => self.apply_report(execution, report, &mut failure),
                    Some(Err(e)) => {
                        error!(execution_id = %execution_id, error = %e, "Step task ended abnormally");
                    }
                }
            }

            let mut exec = execution.lock();
            if exec.status.is_terminal() {
                return;
            }
            let orphaned: Vec<usize> = exec
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.status == StepStatus::Running)
                .map(|(i, _)| i)
                .collect();
            for index in orphaned {
                let step_id = exec.steps[index].step.id.clone();
                let error = "step task ended without a result".to_string();
                exec.fail_step(index, error.clone());
                failure.get_or_insert((step_id, error));
            }
            if let Some((step_id, error)) = failure {
                let retries = exec
                    .step_index(&step_id)
                    .map(|i| exec.steps[i].retry_count)
                    .unwrap_or_default();
                error!(
                    execution_id = %execution_id,
                    step_id = %step_id,
                    retries,
                    error = %error,
                    "Workflow execution failed"
                );
                exec.finish(
                    ExecutionStatus::Failed,
                    Some(format!(
                        "step '{step_id}' failed after {retries} retries: {error}"
                    )),
                    Some(FailureKind::StepFailed),
                );
                return;
            }
        }
    }

    fn apply_report(
        &self,
        execution: &SharedExecution,
        report: StepReport,
        failure: &mut Option<(String, String)>,
    ) {
        let persisted = {
            let mut exec = execution.lock();
            let step_id = exec.steps[report.index].step.id.clone();
            if exec.status.is_terminal() {
                debug!(execution_id = %exec.id, step_id = %step_id, "Discarding step result");
                return;
            }
            match report.outcome {
                ExecutorOutcome::Success(result) => {
                    exec.complete_step(report.index, result.clone());
                    info!(
                        execution_id = %exec.id,
                        step_id = %step_id,
                        progress = exec.progress(),
                        "Step completed"
                    );
                    Some(json!({
                        "execution_id": exec.id,
                        "workflow_id": exec.workflow_id,
                        "step_id": step_id,
                        "result": result,
                    }))
                }
                outcome => {
                    let error = outcome.error_message(report.timeout).unwrap_or_default();
                    warn!(
                        execution_id = %exec.id,
                        step_id = %step_id,
                        retry_count = exec.steps[report.index].retry_count,
                        error = %error,
                        "Step failed permanently"
                    );
                    exec.fail_step(report.index, error.clone());
                    failure.get_or_insert((step_id, error));
                    None
                }
            }
        };
        if let Some(data) = persisted {
            self.share("workflow_step_result", data);
        }
    }

    /// Move a finished execution from the active table to history.
    fn retire(&self, id: Uuid, execution: &SharedExecution) {
        let finished = execution.lock().clone();
        match finished.status {
            ExecutionStatus::Completed => {
                info!(execution_id = %id, workflow_id = %finished.workflow_id, "Workflow execution completed");
            }
            status => {
                info!(
                    execution_id = %id,
                    status = ?status,
                    error = %finished.error.as_deref().unwrap_or_default(),
                    "Workflow execution ended"
                );
            }
        }

        self.share(
            "workflow_result",
            json!({
                "execution_id": id,
                "workflow_id": finished.workflow_id,
                "status": finished.status,
                "final_result": finished.data.final_result,
                "error": finished.error,
            }),
        );
        self.publish_event(execution, "execution_finished");

        {
            let mut history = self.history.lock();
            history.push_back(finished);
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }
        self.active.lock().remove(&id);
    }

    fn share(&self, data_type: &str, data: Value) {
        if !self.config.persist_intermediate_results {
            return;
        }
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.share_data(ENGINE_SENDER, data_type, data, None) {
            warn!(error = %e, data_type, "Failed to share workflow data");
        }
    }

    fn publish_event(&self, execution: &SharedExecution, event: &str) {
        let Some(bus) = &self.bus else {
            return;
        };
        let payload = {
            let exec = execution.lock();
            json!({
                "event": event,
                "execution_id": exec.id,
                "workflow_id": exec.workflow_id,
                "status": exec.status,
                "progress": exec.progress(),
                "error": exec.error,
            })
        };
        let correlation = payload["execution_id"].as_str().unwrap_or_default().to_string();
        let message =
            AgentMessage::status_update(ENGINE_SENDER, payload).with_correlation_id(correlation);
        if let Err(e) = bus.send(message) {
            warn!(error = %e, "Failed to publish workflow event");
        }
    }
}

/// Run one step with its timeout, retrying failed attempts after a fixed
/// delay until `max_retries` is used up.
async fn run_step(
    job: StepJob,
    execution: SharedExecution,
    cancel: CancellationToken,
) -> StepReport {
    let report = |outcome| StepReport {
        index: job.index,
        outcome,
        timeout: job.timeout,
    };
    let executor = match &job.executor {
        Ok(executor) => Arc::clone(executor),
        Err(e) => return report(ExecutorOutcome::Failure(e.to_string())),
    };

    let mut attempt: u32 = 0;
    loop {
        let mut metadata = job.step.metadata.clone();
        metadata.insert("workflow_id".into(), json!(job.workflow_id));
        metadata.insert("execution_id".into(), json!(job.execution_id));
        metadata.insert("step_id".into(), json!(job.step.id));
        metadata.insert("attempt".into(), json!(attempt + 1));
        let task = ExecutorTask::new(
            format!("{}:{}", job.execution_id, job.step.id),
            &job.step.task_type,
            &job.org_id,
            job.input.clone(),
        )
        .with_metadata(metadata);

        let outcome = run_with_timeout(executor.as_ref(), task, job.timeout).await;
        if outcome.is_success() || attempt >= job.step.max_retries {
            return report(outcome);
        }

        attempt += 1;
        warn!(
            execution_id = %job.execution_id,
            step_id = %job.step.id,
            attempt,
            max_retries = job.step.max_retries,
            error = %outcome.error_message(job.timeout).unwrap_or_default(),
            "Step attempt failed, retrying"
        );
        {
            let mut exec = execution.lock();
            if exec.status.is_terminal() {
                return report(outcome);
            }
            exec.steps[job.index].retry_count = attempt;
        }
        tokio::select! {
            _ = cancel.cancelled() => return report(outcome),
            _ = tokio::time::sleep(job.retry_delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_core::{BusConfig, ExecutorResponse};

    /// Echoes its input back under `value` and `text`.
    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        async fn execute(&self, task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
            Ok(ExecutorResponse::success(json!({
                "value": task.input_data,
                "text": format!("{} done", task.task_type),
            })))
        }
    }

    struct Blocking;

    #[async_trait]
    impl TaskExecutor for Blocking {
        async fn execute(&self, _task: ExecutorTask) -> MaestroResult<ExecutorResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ExecutorResponse::success(json!(null)))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry_delay_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn engine_with(
        config: EngineConfig,
        agent_type: &str,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<WorkflowEngine> {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register(agent_type, executor);
        Arc::new(WorkflowEngine::new(config, registry))
    }

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "linear",
            "Linear",
            vec![
                WorkflowStep::new("first", "worker", "first")
                    .map_input("topic", "topic")
                    .map_output("first", "value"),
                WorkflowStep::new("second", "worker", "second")
                    .depends_on(&["first"])
                    .map_input("from_first", "first.topic")
                    .map_output("summary", "text"),
            ],
        )
    }

    async fn wait_terminal(engine: &WorkflowEngine, id: Uuid) -> ExecutionSnapshot {
        for _ in 0..500 {
            let snapshot = engine.get_execution_status(id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {id} did not finish");
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        let mut def = linear();
        def.steps[1].dependencies.push("missing".into());

        let err = engine.register_workflow(def).unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));
        assert!(engine.list_workflows().is_empty());
        assert!(engine.get_workflow("linear").is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        engine.register_workflow(linear()).unwrap();

        let mut changed = linear();
        changed.name = "Changed".into();
        let err = engine.register_workflow(changed).unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));
        assert!(err.to_string().contains("already registered"));
        assert_eq!(engine.get_workflow("linear").unwrap().name, "Linear");
        assert_eq!(engine.list_workflows().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_executor_fails_without_retries() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        let def = WorkflowDefinition::new(
            "ghost",
            "Ghost",
            vec![WorkflowStep::new("haunt", "ghost", "haunt").with_max_retries(3)],
        );
        engine.register_workflow(def).unwrap();

        let id = engine.execute_workflow("ghost", json!({}), "org", None).unwrap();
        let snapshot = wait_terminal(&engine, id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Failed);
        let step = snapshot.step("haunt").unwrap();
        assert_eq!(step.retry_count, 0);
        assert!(step
            .error
            .as_deref()
            .unwrap()
            .contains("no executor registered for agent type 'ghost'"));
    }

    #[tokio::test]
    async fn test_list_executions_reports_each_execution_once() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Blocking));
        engine.register_workflow(linear()).unwrap();
        let running = engine.execute_workflow("linear", json!({}), "org", None).unwrap();
        let other = engine.execute_workflow("linear", json!({}), "org", None).unwrap();

        // An execution being retired sits in history and the active table at once.
        let shared = Arc::clone(&engine.active.lock()[&running].execution);
        let retiring = shared.lock().clone();
        engine.history.lock().push_back(retiring);

        let ids: Vec<Uuid> = engine
            .list_executions()
            .iter()
            .map(|s| s.execution_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&running));
        assert!(ids.contains(&other));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_unknown_workflow() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        let err = engine
            .execute_workflow("nope", json!({}), "org", None)
            .unwrap_err();
        assert!(matches!(err, MaestroError::NotFound(_)));
        assert!(engine.get_execution_status(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_linear_execution_maps_data() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        engine.register_workflow(linear()).unwrap();

        let id = engine
            .execute_workflow("linear", json!({"topic": "rust"}), "org-1", Some("user-1"))
            .unwrap();
        let snapshot = wait_terminal(&engine, id).await;

        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(snapshot.user_id.as_deref(), Some("user-1"));
        assert_eq!(snapshot.intermediate_data["first"]["topic"], "rust");
        assert_eq!(
            snapshot.step("second").unwrap().result.as_ref().unwrap()["value"],
            json!({"from_first": "rust"})
        );
        assert_eq!(snapshot.final_result.unwrap()["text"], "second done");
        assert_eq!(engine.list_executions().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_execution() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Blocking));
        engine.register_workflow(linear()).unwrap();
        let id = engine
            .execute_workflow("linear", json!({"topic": "rust"}), "org", None)
            .unwrap();

        for _ in 0..100 {
            let snapshot = engine.get_execution_status(id).unwrap();
            if snapshot.step("first").unwrap().status == StepStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(engine.cancel_execution(id));
        assert!(!engine.cancel_execution(id));
        assert!(!engine.cancel_execution(Uuid::new_v4()));

        let snapshot = wait_terminal(&engine, id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
        assert_eq!(snapshot.step("second").unwrap().status, StepStatus::Skipped);
        assert!(snapshot.step("second").unwrap().started_at.is_none());
    }

    #[tokio::test]
    async fn test_stuck_execution_is_distinct_failure() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Echo));
        // Bypass validation to plant a cycle.
        let def = WorkflowDefinition::new(
            "cyclic",
            "Cyclic",
            vec![
                WorkflowStep::new("a", "worker", "a"),
                WorkflowStep::new("b", "worker", "b").depends_on(&["c"]),
                WorkflowStep::new("c", "worker", "c").depends_on(&["b"]),
            ],
        );
        engine
            .workflows
            .write()
            .insert(def.id.clone(), Arc::new(def));

        let id = engine.execute_workflow("cyclic", json!({}), "org", None).unwrap();
        let snapshot = wait_terminal(&engine, id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Failed);
        assert_eq!(snapshot.failure_kind, Some(FailureKind::Stuck));
        assert_eq!(snapshot.step("a").unwrap().status, StepStatus::Completed);
        assert!(snapshot.error.unwrap().contains("stuck"));
    }

    #[tokio::test]
    async fn test_execution_timeout() {
        let config = EngineConfig {
            execution_timeout_secs: 1,
            ..fast_config()
        };
        let engine = engine_with(config, "worker", Arc::new(Blocking));
        engine.register_workflow(linear()).unwrap();
        let id = engine.execute_workflow("linear", json!({}), "org", None).unwrap();

        let snapshot = wait_terminal(&engine, id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Failed);
        assert_eq!(snapshot.failure_kind, Some(FailureKind::Timeout));
        assert_eq!(snapshot.step("first").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = EngineConfig {
            max_history: 1,
            ..fast_config()
        };
        let engine = engine_with(config, "worker", Arc::new(Echo));
        engine.register_workflow(linear()).unwrap();

        let first = engine.execute_workflow("linear", json!({}), "org", None).unwrap();
        wait_terminal(&engine, first).await;
        let second = engine.execute_workflow("linear", json!({}), "org", None).unwrap();
        wait_terminal(&engine, second).await;

        // Retirement happens just after the terminal status is set.
        for _ in 0..100 {
            if engine.get_execution_status(first).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.get_execution_status(first).is_err());
        assert!(engine.get_execution_status(second).is_ok());
    }

    #[tokio::test]
    async fn test_results_shared_on_bus() {
        let bus = Arc::new(CommunicationBus::new(BusConfig::default()));
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("worker", Arc::new(Echo));
        let engine = Arc::new(
            WorkflowEngine::new(fast_config(), registry).with_bus(Arc::clone(&bus)),
        );
        engine.register_workflow(linear()).unwrap();
        let id = engine
            .execute_workflow("linear", json!({"topic": "rust"}), "org", None)
            .unwrap();
        wait_terminal(&engine, id).await;

        let mut finals = Vec::new();
        for _ in 0..100 {
            finals = bus.get_shared_data_by_type("workflow_result", Some(ENGINE_SENDER));
            if !finals.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].data["status"], "completed");
        let steps = bus.get_shared_data_by_type("workflow_step_result", None);
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_executions() {
        let engine = engine_with(fast_config(), "worker", Arc::new(Blocking));
        engine.register_workflow(linear()).unwrap();
        let id = engine.execute_workflow("linear", json!({}), "org", None).unwrap();

        engine.shutdown().await;
        let snapshot = engine.get_execution_status(id).unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
        assert!(engine
            .execute_workflow("linear", json!({}), "org", None)
            .is_err());
    }
}
