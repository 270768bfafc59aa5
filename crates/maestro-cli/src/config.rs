//! Config file loading for the `maestro` binary.
//!
//! The file carries the runtime settings of [`MaestroConfig`] at the top
//! level plus any number of `[[workflows]]` tables.

use maestro_core::{MaestroConfig, MaestroError, MaestroResult};
use maestro_orchestrator::WorkflowDefinition;
use serde::Deserialize;
use std::path::Path;

/// Everything `maestro.toml` can hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub runtime: MaestroConfig,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// Parse a config document. Runtime settings are validated here; workflow
/// definitions are validated when they are registered.
pub fn parse_config_str(contents: &str) -> MaestroResult<CliConfig> {
    let config: CliConfig = toml::from_str(contents)
        .map_err(|e| MaestroError::Config(format!("Failed to parse config: {e}")))?;
    config.runtime.validate()?;
    Ok(config)
}

/// Read and parse the config file at `path`.
pub fn parse_config(path: &Path) -> MaestroResult<CliConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        MaestroError::Config(format!(
            "Failed to read config file '{}': {e}",
            path.display()
        ))
    })?;
    parse_config_str(&contents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut()).unwrap();

        let config = parse_config(tmp.path()).unwrap();
        assert!(config.workflows.is_empty());
        assert_eq!(config.runtime.coordinator.heartbeat_timeout_secs, 90);
        assert_eq!(config.runtime.engine.max_history, 100);
        assert_eq!(config.runtime.bus.default_ttl_secs, 3600);
    }

    #[test]
    fn test_parse_runtime_sections_and_workflows() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp.as_file_mut(),
            r#"
[coordinator]
task_timeout_secs = 60

[engine]
retry_delay_ms = 50

[[workflows]]
id = "triage"
name = "Ticket triage"

[[workflows.steps]]
id = "classify"
agent_type = "support"
task_type = "classify_ticket"
input_mapping = {{ ticket = "ticket" }}
output_mapping = {{ "triage.category" = "category" }}

[[workflows.steps]]
id = "route"
agent_type = "support"
task_type = "route_ticket"
dependencies = ["classify"]
timeout = 30
input_mapping = {{ category = "triage.category" }}
"#
        )
        .unwrap();

        let config = parse_config(tmp.path()).unwrap();
        assert_eq!(config.runtime.coordinator.task_timeout_secs, 60);
        assert_eq!(config.runtime.engine.retry_delay_ms, 50);
        assert_eq!(config.workflows.len(), 1);

        let workflow = &config.workflows[0];
        assert_eq!(workflow.version, "1.0.0");
        assert_eq!(workflow.steps.len(), 2);
        let route = workflow.step("route").unwrap();
        assert_eq!(route.timeout_secs, Some(30));
        assert_eq!(route.dependencies, vec!["classify"]);
        assert_eq!(route.max_retries, 3);
        workflow.validate().unwrap();
    }

    #[test]
    fn test_invalid_runtime_settings_rejected() {
        let err = parse_config_str("[coordinator]\ndispatch_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("dispatch_interval_ms"));
    }

    #[test]
    fn test_parse_invalid_toml_returns_error() {
        let err = parse_config_str("{{{{invalid toml!!!!").unwrap_err();
        assert!(
            err.to_string().contains("Failed to parse config"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_parse_nonexistent_file_returns_error() {
        let err = parse_config(Path::new("/nonexistent/path/maestro.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
