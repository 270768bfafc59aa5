//! Task coordination and workflow execution for Maestro.
//!
//! The [`Coordinator`] matches queued tasks to idle agents in strict priority
//! order, watches agent heartbeats and retries failed work. The
//! [`WorkflowEngine`] runs multi-step workflows as dependency graphs, running
//! every step whose dependencies have completed concurrently.
//!
//! # Main types
//!
//! - [`Coordinator`]: Agent registry, priority queue, dispatch loop and liveness monitor.
//! - [`TaskQueue`]: Priority bands with FIFO order inside each band.
//! - [`WorkflowEngine`]: Registers workflow definitions and drives executions.
//! - [`WorkflowDefinition`]: A validated DAG of [`WorkflowStep`]s.
//! - [`ExecutionSnapshot`]: Pollable state of one execution.

/// Agent registry, dispatch loop and liveness monitor.
pub mod coordinator;
/// Coordinator metrics.
pub mod monitor;
/// Priority task queue.
pub mod task_queue;
/// Task and agent types.
pub mod types;
/// Workflow definitions, executions and the engine.
pub mod workflow;

pub use coordinator::{Coordinator, LivenessReport, QueueStatus, COORDINATOR_SENDER};
pub use monitor::CoordinatorMetrics;
pub use task_queue::TaskQueue;
pub use types::{AgentInfo, AgentMetrics, AgentStatus, Task, TaskPayload, TaskStatus};
pub use workflow::{
    default_workflows, ExecutionSnapshot, ExecutionStatus, ExecutionSummary, FailureKind,
    StepSnapshot, StepStatus, WorkflowData, WorkflowDefinition, WorkflowEngine,
    WorkflowExecution, WorkflowStep, WorkflowSummary, ENGINE_SENDER,
};
