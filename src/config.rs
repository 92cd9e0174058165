//! Manager configuration loaded from TOML

use crate::engine::EngineIdentity;
use crate::host_config::{DEFAULT_HOST_CONFIG_FILE_NAME, DEFAULT_ROOT_CONFIG_FILE_NAME};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Construction-time settings for a test application manager
#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    /// Path to the engine's host configuration (sites, pools)
    #[serde(default = "default_host_config")]
    pub host_config: PathBuf,

    /// Path to the engine's root configuration
    #[serde(default = "default_root_config")]
    pub root_config: PathBuf,

    /// Kind of test application to construct (opaque to the manager)
    pub application_type: Option<String>,

    /// Connection pool size handed to the engine (0 lets the engine decide)
    #[serde(default)]
    pub connection_pool_size: u32,

    /// Engine instance name, also the name of the default application pool
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Environment variable substituted for the `%IIS_BIN%` path token
    #[serde(default = "default_bin_variable")]
    pub bin_variable: String,

    /// How the hosting engine is launched
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine kind: same-process or external executable
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Engine runs in this process (default)
    #[default]
    InProcess,
    /// Engine is an external executable started as a child process
    Command,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// Engine kind: "in-process" (default) or "command"
    #[serde(default)]
    pub kind: EngineKind,

    /// Executable to start (command engines only)
    pub command: Option<String>,

    /// Extra arguments placed before the configuration arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the engine process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host_config: default_host_config(),
            root_config: default_root_config(),
            application_type: None,
            connection_pool_size: 0,
            instance_name: default_instance_name(),
            bin_variable: default_bin_variable(),
            engine: EngineConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Use an explicit host configuration path (builder pattern)
    pub fn with_host_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_config = path.into();
        self
    }

    /// Use an explicit root configuration path (builder pattern)
    pub fn with_root_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_config = path.into();
        self
    }

    /// Set the application type (builder pattern)
    pub fn with_application_type(mut self, application_type: &str) -> Self {
        self.application_type = Some(application_type.to_string());
        self
    }

    /// Set the engine connection pool size (builder pattern)
    pub fn with_connection_pool_size(mut self, size: u32) -> Self {
        self.connection_pool_size = size;
        self
    }

    /// The identity an engine started from this configuration carries
    pub fn engine_identity(&self) -> EngineIdentity {
        EngineIdentity::new(
            self.host_config.clone(),
            self.root_config.clone(),
            self.connection_pool_size,
        )
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.host_config.as_os_str().is_empty() {
            errors.push("'host_config' must not be empty".to_string());
        }
        if self.root_config.as_os_str().is_empty() {
            errors.push("'root_config' must not be empty".to_string());
        }
        if self.instance_name.trim().is_empty() {
            errors.push("'instance_name' must not be empty".to_string());
        }
        if self.bin_variable.trim().is_empty() {
            errors.push("'bin_variable' must not be empty".to_string());
        }
        if self.engine.kind == EngineKind::Command && self.engine.command.is_none() {
            errors.push("command engine requires 'engine.command' field".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

// Default value functions
fn default_host_config() -> PathBuf {
    PathBuf::from(DEFAULT_HOST_CONFIG_FILE_NAME)
}

fn default_root_config() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT_CONFIG_FILE_NAME)
}

fn default_instance_name() -> String {
    "LiveSite".to_string()
}

fn default_bin_variable() -> String {
    "IIS_BIN".to_string()
}
