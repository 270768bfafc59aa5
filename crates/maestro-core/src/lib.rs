//! Core types shared by every Maestro crate.
//!
//! # Main types
//!
//! - [`MaestroError`]: Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`]: Convenience alias for `Result<T, MaestroError>`.
//! - [`Priority`]: Urgency of tasks, messages and handoffs.
//! - [`TaskExecutor`]: The contract an agent implements to run a task.
//! - [`ExecutorRegistry`]: Maps agent types to their executors.
//! - [`MaestroConfig`]: Typed runtime configuration loaded from TOML.

/// Runtime configuration.
pub mod config;
/// Error types.
pub mod error;
/// The task executor contract and registry.
pub mod executor;
/// Shared priority levels.
pub mod priority;

pub use config::{BusConfig, CoordinatorConfig, EngineConfig, MaestroConfig};
pub use error::{MaestroError, MaestroResult};
pub use executor::{
    run_with_timeout, ExecutorOutcome, ExecutorRegistry, ExecutorResponse, ExecutorTask,
    TaskExecutor,
};
pub use priority::Priority;
