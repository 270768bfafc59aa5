/// Workflow templates and their validation.
pub mod definition;
/// The engine that runs executions wave by wave.
pub mod engine;
/// Per-execution runtime state and data mapping.
pub mod execution;
/// Built-in workflow templates.
pub mod templates;

pub use definition::{WorkflowDefinition, WorkflowStep, WorkflowSummary};
pub use engine::{WorkflowEngine, ENGINE_SENDER};
pub use execution::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, FailureKind, StepSnapshot, StepStatus,
    WorkflowData, WorkflowExecution,
};
pub use templates::default_workflows;
