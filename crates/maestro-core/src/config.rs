use crate::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration for all three orchestration components.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaestroConfig {
    /// Task queue and agent liveness.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Workflow execution.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Message bus and shared data.
    #[serde(default)]
    pub bus: BusConfig,
}

impl MaestroConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> MaestroResult<Self> {
        let config: MaestroConfig =
            toml::from_str(s).map_err(|e| MaestroError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> MaestroResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MaestroError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings that would stall the background loops.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.coordinator.dispatch_interval_ms == 0 {
            return Err(MaestroError::Config(
                "coordinator.dispatch_interval_ms must be greater than zero".into(),
            ));
        }
        if self.coordinator.heartbeat_interval_secs == 0 {
            return Err(MaestroError::Config(
                "coordinator.heartbeat_interval_secs must be greater than zero".into(),
            ));
        }
        if self.coordinator.heartbeat_timeout_secs < self.coordinator.heartbeat_interval_secs {
            return Err(MaestroError::Config(
                "coordinator.heartbeat_timeout_secs must be at least heartbeat_interval_secs"
                    .into(),
            ));
        }
        if self.engine.default_step_timeout_secs == 0 {
            return Err(MaestroError::Config(
                "engine.default_step_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.bus.cleanup_interval_secs == 0 {
            return Err(MaestroError::Config(
                "bus.cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Task queue and worker coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Sleep between dispatch attempts when nothing could be dispatched.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// How often the liveness monitor runs.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Silence after which an agent is marked offline.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Running time after which a task is considered stuck.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Retry budget for tasks submitted without one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Completed and failed lists keep at most this many tasks each.
    #[serde(default = "default_max_finished_tasks")]
    pub max_finished_tasks: usize,
}

impl CoordinatorConfig {
    /// Dispatch sleep as a `Duration`.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Liveness check period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat silence tolerated before an agent goes offline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Longest a task may run before it counts as stuck.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            default_max_retries: default_max_retries(),
            max_finished_tasks: default_max_finished_tasks(),
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed delay between attempts of a failed step.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-attempt step deadline used when a step sets none.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    /// Wall-clock ceiling for a whole execution.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Finished executions retained for status queries.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Publish step and final results to the bus as shared data.
    #[serde(default = "default_true")]
    pub persist_intermediate_results: bool,
}

impl EngineConfig {
    /// Fixed pause between step attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Default step timeout as a `Duration`.
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_secs(self.default_step_timeout_secs)
    }

    /// Whole-execution ceiling.
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            default_step_timeout_secs: default_step_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_history: default_max_history(),
            persist_intermediate_results: true,
        }
    }
}

/// Communication bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Period of the TTL sweep.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// TTL applied when `share_data` is called without one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Oldest messages are dropped once a mailbox holds this many.
    #[serde(default = "default_max_mailbox_size")]
    pub max_mailbox_size: usize,
}

impl BusConfig {
    /// Sweep period as a `Duration`.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default_ttl_secs: default_ttl_secs(),
            max_mailbox_size: default_max_mailbox_size(),
        }
    }
}

fn default_dispatch_interval_ms() -> u64 {
    100
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_heartbeat_timeout_secs() -> u64 {
    90
}
fn default_task_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_finished_tasks() -> usize {
    1000
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_step_timeout_secs() -> u64 {
    300
}
fn default_execution_timeout_secs() -> u64 {
    3600
}
fn default_max_history() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_cleanup_interval_secs() -> u64 {
    60
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_max_mailbox_size() -> usize {
    1000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MaestroConfig::from_toml_str("").unwrap();
        assert_eq!(config.coordinator.dispatch_interval_ms, 100);
        assert_eq!(config.coordinator.default_max_retries, 3);
        assert_eq!(config.engine.retry_delay(), Duration::from_secs(1));
        assert!(config.engine.persist_intermediate_results);
        assert_eq!(config.bus.default_ttl_secs, 3600);
    }

    #[test]
    fn test_partial_override() {
        let config = MaestroConfig::from_toml_str(
            r#"
            [coordinator]
            heartbeat_interval_secs = 5
            heartbeat_timeout_secs = 15

            [bus]
            max_mailbox_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.coordinator.heartbeat_timeout(), Duration::from_secs(15));
        assert_eq!(config.coordinator.task_timeout_secs, 300);
        assert_eq!(config.bus.max_mailbox_size, 10);
    }

    #[test]
    fn test_rejects_zero_dispatch_interval() {
        let err = MaestroConfig::from_toml_str("[coordinator]\ndispatch_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("dispatch_interval_ms"));
    }

    #[test]
    fn test_rejects_timeout_shorter_than_interval() {
        let err = MaestroConfig::from_toml_str(
            "[coordinator]\nheartbeat_interval_secs = 30\nheartbeat_timeout_secs = 10",
        )
        .unwrap_err();
        assert!(matches!(err, MaestroError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(MaestroConfig::from_toml_str("[coordinator\n").is_err());
    }
}
