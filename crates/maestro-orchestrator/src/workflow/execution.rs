use super::definition::{WorkflowDefinition, WorkflowStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Runtime state of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies.
    Pending,
    /// Dispatched to an executor.
    Running,
    /// Finished successfully.
    Completed,
    /// Out of retries.
    Failed,
    /// Never run because the execution ended first.
    Skipped,
}

impl StepStatus {
    /// Completed, failed or skipped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// A template step plus its mutable runtime fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    /// Template the run was cloned from.
    pub step: WorkflowStep,
    /// Current state.
    pub status: StepStatus,
    /// Retries used so far.
    pub retry_count: u32,
    /// Executor result on success.
    pub result: Option<Value>,
    /// Last failure reason.
    pub error: Option<String>,
    /// First dispatch.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRun {
    fn new(step: WorkflowStep) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// The blackboard shared by the steps of one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowData {
    /// Caller input, never modified.
    pub input_data: Value,
    /// Outputs written by completed steps.
    pub intermediate_data: Value,
    /// Set once the execution completes.
    pub final_result: Option<Value>,
}

impl WorkflowData {
    /// Blackboard with empty intermediate data.
    pub fn new(input_data: Value) -> Self {
        Self {
            input_data,
            intermediate_data: Value::Object(Map::new()),
            final_result: None,
        }
    }

    /// Resolve a dotted source path: input data first, intermediate data second.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.input_data, path).or_else(|| lookup_path(&self.intermediate_data, path))
    }

    /// Build the executor input for `step`. Without an input mapping the step
    /// receives the whole input data; unresolved mapped keys are left out.
    pub fn step_input(&self, step: &WorkflowStep) -> Value {
        if step.input_mapping.is_empty() {
            return self.input_data.clone();
        }
        let mut input = Map::new();
        for (key, source) in &step.input_mapping {
            match self.resolve(source) {
                Some(value) => {
                    input.insert(key.clone(), value.clone());
                }
                None => {
                    warn!(step_id = %step.id, input_key = %key, source = %source, "Unresolved step input");
                }
            }
        }
        Value::Object(input)
    }

    /// Write a step result into the intermediate data according to the
    /// step's output mapping. A mapped key missing from the result writes
    /// the whole result.
    pub fn store_output(&mut self, step: &WorkflowStep, result: &Value) {
        if step.output_mapping.is_empty() {
            set_path(&mut self.intermediate_data, &step.id, result.clone());
            return;
        }
        for (dest, key) in &step.output_mapping {
            let value = lookup_path(result, key).unwrap_or(result).clone();
            set_path(&mut self.intermediate_data, dest, value);
        }
    }
}

/// Follow a dotted path through nested JSON objects.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Write `value` at a dotted path, creating (or replacing non-object)
/// intermediate nodes.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut node = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Overall state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// Steps are being scheduled.
    Running,
    /// Every step completed.
    Completed,
    /// A step failed, the run got stuck or timed out.
    Failed,
    /// Stopped by the caller or by shutdown.
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Why a failed execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step exhausted its retries.
    StepFailed,
    /// Pending steps remained but none could become ready.
    Stuck,
    /// The execution ran past its overall deadline.
    Timeout,
}

/// One instantiation of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Execution id.
    pub id: Uuid,
    /// Workflow this run instantiates.
    pub workflow_id: String,
    /// Version of that workflow.
    pub workflow_version: String,
    /// Organization the run is for.
    pub org_id: String,
    /// User who started the run.
    pub user_id: Option<String>,
    /// Current state.
    pub status: ExecutionStatus,
    /// One entry per template step, in template order.
    pub steps: Vec<StepRun>,
    /// Input, intermediate and final data.
    pub data: WorkflowData,
    /// Ids of the steps whose results make up `final_result`.
    pub sinks: Vec<String>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When scheduling began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the execution did not complete.
    pub error: Option<String>,
    /// Category of failure.
    pub failure_kind: Option<FailureKind>,
}

impl WorkflowExecution {
    /// A pending execution of `definition`.
    pub fn new(
        definition: &WorkflowDefinition,
        input_data: Value,
        org_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id.clone(),
            workflow_version: definition.version.clone(),
            org_id: org_id.into(),
            user_id,
            status: ExecutionStatus::Pending,
            steps: definition.steps.iter().cloned().map(StepRun::new).collect(),
            data: WorkflowData::new(input_data),
            sinks: definition.sinks().iter().map(|s| s.id.clone()).collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            failure_kind: None,
        }
    }

    /// Position of a step by id.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step.id == step_id)
    }

    fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|s| s.step.id == step_id)
            .map(|s| s.status)
    }

    /// Indexes of pending steps whose dependencies have all completed.
    pub fn ready_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, run)| run.status == StepStatus::Pending)
            .filter(|(_, run)| {
                run.step
                    .dependencies
                    .iter()
                    .all(|dep| self.step_status(dep) == Some(StepStatus::Completed))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any step is still pending.
    pub fn has_pending(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Pending)
    }

    /// Whether every step completed.
    pub fn all_completed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Number of completed steps.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Completed steps as a percentage of all steps.
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.completed_steps() as f64 / self.steps.len() as f64 * 100.0
    }

    /// Mark a step as dispatched and return its input.
    pub fn begin_step(&mut self, index: usize) -> Value {
        let input = self.data.step_input(&self.steps[index].step);
        let run = &mut self.steps[index];
        run.status = StepStatus::Running;
        run.started_at = Some(Utc::now());
        input
    }

    /// Record a successful step and, if it was the last one, complete the
    /// execution in the same update.
    pub fn complete_step(&mut self, index: usize, result: Value) {
        let step = self.steps[index].step.clone();
        self.data.store_output(&step, &result);
        let run = &mut self.steps[index];
        run.status = StepStatus::Completed;
        run.result = Some(result);
        run.error = None;
        run.completed_at = Some(Utc::now());

        if self.all_completed() {
            self.data.final_result = Some(self.collect_final_result());
            self.finish(ExecutionStatus::Completed, None, None);
        }
    }

    /// Mark a step failed.
    pub fn fail_step(&mut self, index: usize, error: String) {
        let run = &mut self.steps[index];
        run.status = StepStatus::Failed;
        run.error = Some(error);
        run.completed_at = Some(Utc::now());
    }

    /// Single sink: its result. Several sinks: an object keyed by sink id.
    fn collect_final_result(&self) -> Value {
        let result_of = |id: &str| {
            self.steps
                .iter()
                .find(|s| s.step.id == id)
                .and_then(|s| s.result.clone())
                .unwrap_or(Value::Null)
        };
        match self.sinks.as_slice() {
            [only] => result_of(only.as_str()),
            sinks => Value::Object(
                sinks
                    .iter()
                    .map(|id| (id.clone(), result_of(id.as_str())))
                    .collect(),
            ),
        }
    }

    /// Move to a terminal status. Steps that never finished are skipped.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>, kind: Option<FailureKind>) {
        let now = Utc::now();
        for run in &mut self.steps {
            match run.status {
                StepStatus::Pending => run.status = StepStatus::Skipped,
                StepStatus::Running => {
                    run.status = StepStatus::Skipped;
                    run.error = Some("result discarded: execution ended".to_string());
                    run.completed_at = Some(now);
                }
                _ => {}
            }
        }
        self.status = status;
        self.error = error;
        self.failure_kind = kind;
        self.completed_at = Some(now);
    }

    /// Point-in-time copy for callers.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            workflow_version: self.workflow_version.clone(),
            org_id: self.org_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            progress: self.progress(),
            steps: self.steps.iter().map(StepSnapshot::from).collect(),
            intermediate_data: self.data.intermediate_data.clone(),
            final_result: self.data.final_result.clone(),
            error: self.error.clone(),
            failure_kind: self.failure_kind,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    /// Short listing entry.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            progress: self.progress(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Per-step view inside an [`ExecutionSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Step id.
    pub step_id: String,
    /// Agent type that runs the step.
    pub agent_type: String,
    /// Task type passed to the executor.
    pub task_type: String,
    /// Steps that must complete first.
    pub dependencies: Vec<String>,
    /// Current state.
    pub status: StepStatus,
    /// Retries used so far.
    pub retry_count: u32,
    /// Executor result on success.
    pub result: Option<Value>,
    /// Last failure reason.
    pub error: Option<String>,
    /// First dispatch.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&StepRun> for StepSnapshot {
    fn from(run: &StepRun) -> Self {
        Self {
            step_id: run.step.id.clone(),
            agent_type: run.step.agent_type.clone(),
            task_type: run.step.task_type.clone(),
            dependencies: run.step.dependencies.clone(),
            status: run.status,
            retry_count: run.retry_count,
            result: run.result.clone(),
            error: run.error.clone(),
            started_at: run.started_at,
            completed_at: run.completed_at,
        }
    }
}

/// Point-in-time view of an execution, as returned by
/// `WorkflowEngine::get_execution_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Execution id.
    pub execution_id: Uuid,
    /// Workflow this run instantiates.
    pub workflow_id: String,
    /// Version of that workflow.
    pub workflow_version: String,
    /// Organization the run is for.
    pub org_id: String,
    /// User who started the run.
    pub user_id: Option<String>,
    /// Current state.
    pub status: ExecutionStatus,
    /// Completed steps as a percentage of all steps.
    pub progress: f64,
    /// Per-step state.
    pub steps: Vec<StepSnapshot>,
    /// Outputs written so far.
    pub intermediate_data: Value,
    /// Sink output once completed.
    pub final_result: Option<Value>,
    /// Why the execution did not complete.
    pub error: Option<String>,
    /// Category of failure.
    pub failure_kind: Option<FailureKind>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When scheduling began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionSnapshot {
    /// One step's snapshot by id.
    pub fn step(&self, step_id: &str) -> Option<&StepSnapshot> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Listing entry returned by `WorkflowEngine::list_executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Execution id.
    pub execution_id: Uuid,
    /// Workflow this run instantiates.
    pub workflow_id: String,
    /// Current state.
    pub status: ExecutionStatus,
    /// Completed steps as a percentage.
    pub progress: f64,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fan_in() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "fan_in",
            "Fan in",
            vec![
                WorkflowStep::new("a", "x", "t").map_output("left", "value"),
                WorkflowStep::new("b", "x", "t").map_output("right", "value"),
                WorkflowStep::new("c", "x", "t")
                    .depends_on(&["a", "b"])
                    .map_input("l", "left")
                    .map_input("r", "right"),
            ],
        )
    }

    #[test]
    fn test_lookup_and_set_path() {
        let mut root = json!({});
        set_path(&mut root, "analysis.market.size", json!(42));
        set_path(&mut root, "analysis.kpis", json!(["mrr"]));
        assert_eq!(lookup_path(&root, "analysis.market.size"), Some(&json!(42)));
        assert_eq!(root["analysis"]["kpis"][0], "mrr");
        assert!(lookup_path(&root, "analysis.missing").is_none());

        set_path(&mut root, "analysis.market.size.unit", json!("usd"));
        assert_eq!(root["analysis"]["market"]["size"]["unit"], "usd");
    }

    #[test]
    fn test_step_input_prefers_input_data() {
        let mut data = WorkflowData::new(json!({"topic": "rust", "left": "from input"}));
        set_path(&mut data.intermediate_data, "left", json!("from step"));
        set_path(&mut data.intermediate_data, "right", json!("only step"));

        let step = WorkflowStep::new("c", "x", "t")
            .map_input("l", "left")
            .map_input("r", "right")
            .map_input("gone", "nowhere");
        let input = data.step_input(&step);
        assert_eq!(input, json!({"l": "from input", "r": "only step"}));

        let bare = WorkflowStep::new("d", "x", "t");
        assert_eq!(data.step_input(&bare)["topic"], "rust");
    }

    #[test]
    fn test_store_output_mapping() {
        let mut data = WorkflowData::new(json!({}));
        let mapped = WorkflowStep::new("a", "x", "t")
            .map_output("market.size", "size")
            .map_output("market.raw", "missing_key");
        data.store_output(&mapped, &json!({"size": 10}));
        assert_eq!(data.intermediate_data["market"]["size"], 10);
        assert_eq!(data.intermediate_data["market"]["raw"], json!({"size": 10}));

        let unmapped = WorkflowStep::new("b", "x", "t");
        data.store_output(&unmapped, &json!("text"));
        assert_eq!(data.intermediate_data["b"], "text");
    }

    #[test]
    fn test_ready_steps_follow_dependencies() {
        let mut exec = WorkflowExecution::new(&fan_in(), json!({}), "org", None);
        assert_eq!(exec.ready_steps(), vec![0, 1]);

        exec.begin_step(0);
        exec.complete_step(0, json!({"value": 1}));
        assert_eq!(exec.ready_steps(), vec![1]);

        exec.begin_step(1);
        exec.complete_step(1, json!({"value": 2}));
        assert_eq!(exec.ready_steps(), vec![2]);
        assert_eq!(exec.begin_step(2), json!({"l": 1, "r": 2}));
    }

    #[test]
    fn test_last_step_completes_execution() {
        let mut exec = WorkflowExecution::new(&fan_in(), json!({}), "org", None);
        exec.status = ExecutionStatus::Running;
        for i in 0..2 {
            exec.begin_step(i);
            exec.complete_step(i, json!({"value": i}));
            assert_eq!(exec.status, ExecutionStatus::Running);
        }
        exec.begin_step(2);
        exec.complete_step(2, json!({"report": "done"}));
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.progress(), 100.0);
        assert_eq!(exec.data.final_result, Some(json!({"report": "done"})));
    }

    #[test]
    fn test_multiple_sinks_keep_all_outputs() {
        let def = WorkflowDefinition::new(
            "split",
            "Split",
            vec![
                WorkflowStep::new("root", "x", "t"),
                WorkflowStep::new("left", "x", "t").depends_on(&["root"]),
                WorkflowStep::new("right", "x", "t").depends_on(&["root"]),
            ],
        );
        let mut exec = WorkflowExecution::new(&def, json!({}), "org", None);
        for (i, value) in [json!(0), json!("L"), json!("R")].into_iter().enumerate() {
            exec.begin_step(i);
            exec.complete_step(i, value);
        }
        assert_eq!(exec.data.final_result, Some(json!({"left": "L", "right": "R"})));
    }

    #[test]
    fn test_finish_skips_unfinished_steps() {
        let mut exec = WorkflowExecution::new(&fan_in(), json!({}), "org", None);
        exec.begin_step(0);
        exec.begin_step(1);
        exec.fail_step(1, "boom".into());
        exec.finish(
            ExecutionStatus::Failed,
            Some("step 'b' failed".into()),
            Some(FailureKind::StepFailed),
        );

        let snap = exec.snapshot();
        assert_eq!(snap.status, ExecutionStatus::Failed);
        assert_eq!(snap.step("a").unwrap().status, StepStatus::Skipped);
        assert_eq!(snap.step("b").unwrap().status, StepStatus::Failed);
        assert_eq!(snap.step("c").unwrap().status, StepStatus::Skipped);
        assert!(snap.step("c").unwrap().started_at.is_none());
        assert_eq!(snap.progress, 0.0);
        assert_eq!(snap.failure_kind, Some(FailureKind::StepFailed));
    }
}
