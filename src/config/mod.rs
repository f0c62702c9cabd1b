//! Declarative catalogs (tools/workflows/permissions) loader, and
//! process-level runtime settings (§6, §10.3).
//!
//! Catalogs are immutable for the process lifetime — reloading any of them
//! requires a restart, mirroring the teacher's `wg-bastion` `PolicyBuilder`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::checkpoint::{Checkpointer, InMemoryCheckpointer};
use crate::error::ErrorKind;
use crate::event_bus::{EventSink, StdOutSink};
use crate::orchestrator::WorkflowTemplate;
use crate::tools::ToolDescriptor;

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::file_read)))]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {source}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::parse)))]
    Parse {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsupported config file format: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::unsupported_format)))]
    UnsupportedFormat { message: String },

    #[error("config validation failed: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::validation)))]
    Validation(#[from] validator::ValidationErrors),

    #[error("duplicate permission entry for tenant `{tenant_id}`")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::duplicate_permission)))]
    DuplicatePermission { tenant_id: String },

    #[error("failed to parse environment variable {key}: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::env_parse)))]
    EnvParse { key: String, message: String },

    #[cfg(feature = "sqlite")]
    #[error("failed to connect checkpointer backend: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::config::checkpointer_connect)))]
    CheckpointerConnect(#[from] crate::checkpoint::CheckpointerError),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One tenant's allowed tools/agents (§6 permissions catalog).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PermissionEntry {
    #[validate(length(min = 1))]
    pub tenant_id: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub allowed_agents: Vec<String>,
}

/// The three declarative catalogs loaded once at process startup (§6, §10.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub workflows: Vec<WorkflowTemplate>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

impl EngineConfig {
    fn validate_catalogs(&self) -> Result<()> {
        let mut seen_tools = std::collections::HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::Validation(validator::ValidationErrors::new()));
            }
            if !seen_tools.insert(tool.name.clone()) {
                return Err(ConfigError::UnsupportedFormat {
                    message: format!("duplicate tool descriptor `{}`", tool.name),
                });
            }
        }
        let mut seen_tenants = std::collections::HashSet::new();
        for entry in &self.permissions {
            entry.validate()?;
            if !seen_tenants.insert(entry.tenant_id.clone()) {
                return Err(ConfigError::DuplicatePermission {
                    tenant_id: entry.tenant_id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Loads an [`EngineConfig`] from a file plus environment overrides,
/// grounded on the teacher's `PolicyBuilder` (`.with_file`/`.with_env`/`.build`).
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    base: EngineConfig,
    env_prefix: Option<String>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the catalogs from a YAML/TOML/JSON file, sniffed by extension.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "YAML".to_string(),
                source: Box::new(e),
            })?,
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "TOML".to_string(),
                source: Box::new(e),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "JSON".to_string(),
                source: Box::new(e),
            })?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    message: "file extension must be .yaml, .yml, .toml, or .json".to_string(),
                });
            }
        };
        self.base = config;
        Ok(self)
    }

    /// Overlay environment-variable overrides prefixed with `prefix`, e.g.
    /// `AGENTLOOM_TOOL_TIMEOUT_MS` (loaded via `dotenvy` first, matching the
    /// teacher's `RuntimeConfig` resolution of `SQLITE_DB_NAME`).
    #[must_use]
    pub fn with_env(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let mut config = self.base;
        if let Some(prefix) = &self.env_prefix {
            dotenvy::dotenv().ok();
            let timeout_key = format!("{prefix}TOOL_TIMEOUT_MS");
            if let Ok(raw) = std::env::var(&timeout_key) {
                let timeout_ms: u64 = raw.parse().map_err(|_| ConfigError::EnvParse {
                    key: timeout_key.clone(),
                    message: "must be an integer number of milliseconds".to_string(),
                })?;
                for tool in &mut config.tools {
                    tool.timeout_ms = timeout_ms;
                }
            }
        }
        config.validate_catalogs()?;
        Ok(config)
    }
}

/// Which Checkpointer backend the process should use (§4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointerBackend {
    #[default]
    InMemory,
    #[cfg(feature = "sqlite")]
    Sqlite { database_url: String },
}

/// EventBus buffer sizing and the sinks it should start with (§4.1).
#[derive(Debug, Clone)]
pub struct EventBusSettings {
    pub session_backlog: usize,
    pub firehose_capacity: usize,
    pub use_stdout_sink: bool,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            session_backlog: crate::event_bus::router::DEFAULT_SESSION_BACKLOG,
            firehose_capacity: crate::event_bus::hub::DEFAULT_FIREHOSE_CAPACITY,
            use_stdout_sink: true,
        }
    }
}

/// Process-wide runtime settings independent of the catalogs (§10.3):
/// checkpointer backend selection and EventBus sizing/sinks.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub checkpointer_backend: CheckpointerBackend,
    pub event_bus: EventBusSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            checkpointer_backend: CheckpointerBackend::default(),
            event_bus: EventBusSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Build the Checkpointer this configuration selects, connecting to the
    /// backend (a no-op for the in-memory default).
    pub async fn build_checkpointer(&self) -> Result<std::sync::Arc<dyn Checkpointer>> {
        match &self.checkpointer_backend {
            CheckpointerBackend::InMemory => Ok(std::sync::Arc::new(InMemoryCheckpointer::new())),
            #[cfg(feature = "sqlite")]
            CheckpointerBackend::Sqlite { database_url } => {
                let checkpointer = crate::checkpoint::SqliteCheckpointer::connect(database_url).await?;
                Ok(std::sync::Arc::new(checkpointer))
            }
        }
    }

    pub fn default_sinks(&self) -> Vec<Box<dyn EventSink>> {
        if self.event_bus.use_stdout_sink {
            vec![Box::new(StdOutSink::default())]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_config_has_empty_catalogs() {
        let config = EngineConfig::default();
        assert!(config.tools.is_empty());
        assert!(config.workflows.is_empty());
        assert!(config.permissions.is_empty());
    }

    #[test]
    fn builder_with_no_file_produces_empty_validated_config() {
        let config = EngineConfigBuilder::new().build().unwrap();
        assert!(config.tools.is_empty());
    }

    #[test]
    fn duplicate_tenant_permissions_are_rejected() {
        let config = EngineConfig {
            tools: Vec::new(),
            workflows: Vec::new(),
            permissions: vec![
                PermissionEntry {
                    tenant_id: "acme".into(),
                    allowed_tools: vec![],
                    allowed_agents: vec![],
                },
                PermissionEntry {
                    tenant_id: "acme".into(),
                    allowed_tools: vec![],
                    allowed_agents: vec![],
                },
            ],
        };
        assert!(config.validate_catalogs().is_err());
    }

    #[test]
    fn runtime_config_default_uses_in_memory_checkpointer() {
        let runtime = RuntimeConfig::default();
        assert_eq!(runtime.checkpointer_backend, CheckpointerBackend::InMemory);
    }
}
