use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

fn default_step_retries() -> u32 {
    3
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// One node of a workflow template, bound to an agent type and task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id, unique within the workflow.
    pub id: String,
    /// Human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// Agent type that runs the step.
    pub agent_type: String,
    /// Task type passed to the executor.
    pub task_type: String,
    /// Step input key -> dotted source path, looked up in the execution's
    /// input data first and in the intermediate data second.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    /// Dotted destination path in the intermediate data -> key of the step
    /// result.
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
    /// Steps that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt deadline. Falls back to the engine default when unset.
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,
    /// Retries after the first attempt.
    #[serde(default = "default_step_retries")]
    pub max_retries: u32,
    /// Extra keys forwarded to the executor untouched.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowStep {
    /// A step with no mappings, dependencies or timeout.
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            agent_type: agent_type.into(),
            task_type: task_type.into(),
            input_mapping: BTreeMap::new(),
            output_mapping: BTreeMap::new(),
            dependencies: Vec::new(),
            timeout_secs: None,
            max_retries: default_step_retries(),
            metadata: HashMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add dependencies.
    pub fn depends_on(mut self, steps: &[&str]) -> Self {
        self.dependencies.extend(steps.iter().map(|s| s.to_string()));
        self
    }

    /// Feed `source_path` to the step as `input_key`.
    pub fn map_input(mut self, input_key: impl Into<String>, source_path: impl Into<String>) -> Self {
        self.input_mapping.insert(input_key.into(), source_path.into());
        self
    }

    /// Write result key `result_key` to `dest_path`.
    pub fn map_output(mut self, dest_path: impl Into<String>, result_key: impl Into<String>) -> Self {
        self.output_mapping.insert(dest_path.into(), result_key.into());
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Paths this step writes in the intermediate data. A step without an
    /// output mapping writes its whole result under its own id.
    pub fn output_paths(&self) -> Vec<&str> {
        if self.output_mapping.is_empty() {
            vec![self.id.as_str()]
        } else {
            self.output_mapping.keys().map(String::as_str).collect()
        }
    }
}

/// A named, versioned DAG of steps. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Template version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// Steps in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// JSON schema of the expected input.
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// JSON schema of the final result.
    #[serde(default)]
    pub output_schema: serde_json::Value,
}

/// Listing entry returned by `WorkflowEngine::list_workflows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow id.
    pub workflow_id: String,
    /// Display name.
    pub name: String,
    /// Template version.
    pub version: String,
    /// Human-readable purpose.
    pub description: String,
    /// Number of steps.
    pub steps_count: usize,
    /// JSON schema of the expected input.
    pub input_schema: serde_json::Value,
    /// JSON schema of the final result.
    pub output_schema: serde_json::Value,
}

impl WorkflowDefinition {
    /// A version 1.0.0 workflow without schemas.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            description: String::new(),
            steps,
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the input and output schemas.
    pub fn with_schemas(mut self, input: serde_json::Value, output: serde_json::Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    /// A step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps nothing else depends on, in declaration order.
    pub fn sinks(&self) -> Vec<&WorkflowStep> {
        let depended_on: HashSet<&str> = self
            .steps
            .iter()
            .flat_map(|s| s.dependencies.iter().map(String::as_str))
            .collect();
        self.steps
            .iter()
            .filter(|s| !depended_on.contains(s.id.as_str()))
            .collect()
    }

    /// Listing entry for this definition.
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            steps_count: self.steps.len(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }

    /// Reject malformed templates: missing or duplicate ids, unknown or
    /// self dependencies, cycles, zero timeouts, and output paths shared by
    /// steps that may run at the same time.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.id.trim().is_empty() {
            return Err(invalid("workflow id must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(invalid(format!("workflow '{}' has no steps", self.id)));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step id must not be empty"));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.agent_type.trim().is_empty() || step.task_type.trim().is_empty() {
                return Err(invalid(format!(
                    "step '{}' needs an agent type and a task type",
                    step.id
                )));
            }
            if step.timeout_secs == Some(0) {
                return Err(invalid(format!("step '{}' has a zero timeout", step.id)));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(invalid(format!("step '{}' depends on itself", step.id)));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                }
            }
        }

        if let Some(step_id) = self.find_cycle() {
            return Err(invalid(format!(
                "dependency cycle through step '{step_id}'"
            )));
        }

        self.check_output_overlap()
    }

    fn find_cycle(&self) -> Option<&str> {
        let mut marks: HashMap<&str, u8> = HashMap::new();
        self.steps
            .iter()
            .find(|step| self.dfs_cycle(step.id.as_str(), &mut marks))
            .map(|step| step.id.as_str())
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, marks: &mut HashMap<&'a str, u8>) -> bool {
        match marks.get(id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        marks.insert(id, 1);
        if let Some(step) = self.step(id) {
            for dep in &step.dependencies {
                if self.dfs_cycle(dep.as_str(), marks) {
                    return true;
                }
            }
        }
        marks.insert(id, 2);
        false
    }

    /// Transitive dependencies of every step. Only meaningful on an acyclic
    /// graph.
    fn ancestors(&self) -> HashMap<&str, HashSet<&str>> {
        fn visit<'a>(
            def: &'a WorkflowDefinition,
            id: &'a str,
            memo: &mut HashMap<&'a str, HashSet<&'a str>>,
        ) -> HashSet<&'a str> {
            if let Some(known) = memo.get(id) {
                return known.clone();
            }
            let mut all = HashSet::new();
            if let Some(step) = def.step(id) {
                for dep in &step.dependencies {
                    all.insert(dep.as_str());
                    all.extend(visit(def, dep.as_str(), memo));
                }
            }
            memo.insert(id, all.clone());
            all
        }

        let mut memo = HashMap::new();
        for step in &self.steps {
            visit(self, step.id.as_str(), &mut memo);
        }
        memo
    }

    fn check_output_overlap(&self) -> MaestroResult<()> {
        let ancestors = self.ancestors();
        let ordered = |a: &str, b: &str| {
            ancestors.get(a).is_some_and(|set| set.contains(b))
                || ancestors.get(b).is_some_and(|set| set.contains(a))
        };

        for step in &self.steps {
            let paths = step.output_paths();
            for (i, a) in paths.iter().enumerate() {
                for b in &paths[i + 1..] {
                    if paths_overlap(a, b) {
                        return Err(invalid(format!(
                            "step '{}' writes overlapping output paths '{a}' and '{b}'",
                            step.id
                        )));
                    }
                }
            }
        }

        for (i, first) in self.steps.iter().enumerate() {
            for second in &self.steps[i + 1..] {
                if ordered(first.id.as_str(), second.id.as_str()) {
                    continue;
                }
                for a in first.output_paths() {
                    for b in second.output_paths() {
                        if paths_overlap(a, b) {
                            return Err(invalid(format!(
                                "steps '{}' and '{}' may run concurrently but both write '{}'",
                                first.id,
                                second.id,
                                if a.len() <= b.len() { a } else { b }
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Two dotted paths overlap when one is a segment prefix of the other.
fn paths_overlap(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('.').collect();
    let b: Vec<&str> = b.split('.').collect();
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn invalid(msg: impl Into<String>) -> MaestroError {
    MaestroError::Validation(msg.into())
}
