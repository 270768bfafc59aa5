use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type shared by every Maestro crate.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum MaestroError {
    /// A workflow definition or request was rejected before any work started.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced agent, task, workflow, execution or handoff does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error raised by the task coordinator.
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// An error raised by the workflow engine.
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// An error raised by the communication bus.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An executor returned an error instead of a response.
    #[error("Executor error: {0}")]
    Executor(String),

    /// An operation did not finish within its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
