//! Runtime Configuration Module
//!
//! Provides configuration loading for remote runtimes.
//! Supports loading from TOML files with environment-specific overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity of this runtime process
    pub runtime: RuntimeSettings,

    /// Naming facility policy
    pub naming: NamingSettings,

    /// Event stream settings
    pub events: EventSettings,

    /// Security relay settings
    pub security: SecuritySettings,

    /// Nodes created at boot
    pub nodes: Vec<NodeSettings>,

    /// Virtual nodes registered at boot
    pub virtual_nodes: Vec<String>,
}

/// Runtime identity settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Process name, last segment of the runtime URL
    pub name: String,
    pub host: String,
    pub port: u16,
    pub transport_tag: String,

    /// URL of the runtime that spawned this one, if any
    pub parent: Option<String>,
}

/// Naming facility policy
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct NamingSettings {
    /// Surface binding conflicts to callers instead of logging them
    pub strict_registration: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EventSettings {
    pub channel_capacity: usize,
}

/// Security relay settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SecuritySettings {
    /// DER-encoded creator certificate
    pub certificate_path: Option<PathBuf>,

    /// Reference to the policy server nodes inherit by default
    pub policy_server: Option<String>,
}

/// Node created at boot
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeSettings {
    pub name: String,

    #[serde(default = "default_job_id")]
    pub job_id: String,

    pub virtual_node: Option<String>,

    #[serde(default = "default_replace")]
    pub replace: bool,
}

fn default_job_id() -> String {
    "-".to_string()
}

fn default_replace() -> bool {
    true
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            name: generate_process_name(),
            host: defaults::runtime::HOST.to_string(),
            port: defaults::runtime::PORT,
            transport_tag: defaults::runtime::TRANSPORT_TAG.to_string(),
            parent: None,
        }
    }
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            strict_registration: defaults::naming::STRICT_REGISTRATION,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::events::CHANNEL_CAPACITY,
        }
    }
}

/// Generate a process name unique enough for one naming facility
pub fn generate_process_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", defaults::runtime::NAME_PREFIX, &id[..8])
}

impl RuntimeConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/runtime.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (RUNTIME_RUNTIME__PORT=2000)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.expand_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single TOML file without layering
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config")?;
        config.validate()?;
        debug!(runtime = %config.runtime.name, "Parsed runtime config from {}", path.display());
        Ok(config)
    }

    /// Reject settings no runtime can start with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.name.trim().is_empty() {
            bail!("runtime.name cannot be empty");
        }
        if self.runtime.name.contains('/') {
            bail!("runtime.name cannot contain '/': {}", self.runtime.name);
        }
        if self.runtime.host.trim().is_empty() {
            bail!("runtime.host cannot be empty");
        }
        if self.runtime.transport_tag.trim().is_empty() {
            bail!("runtime.transport_tag cannot be empty");
        }
        if self.runtime.port == 0 {
            bail!("runtime.port must be non-zero");
        }
        if self.events.channel_capacity == 0 {
            bail!("events.channel_capacity must be non-zero");
        }
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                bail!("nodes[].name cannot be empty");
            }
        }
        Ok(())
    }

    /// Expand environment variables in string values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let host = shellexpand::env(&self.runtime.host).context("Failed to expand runtime host")?;
        self.runtime.host = host.to_string();

        if let Some(parent) = &self.runtime.parent {
            let expanded = shellexpand::env(parent).context("Failed to expand parent URL")?;
            self.runtime.parent = Some(expanded.to_string());
        }

        if let Some(path) = &self.security.certificate_path {
            let raw = path.to_string_lossy();
            let expanded = shellexpand::env(&raw).context("Failed to expand certificate path")?;
            self.security.certificate_path = Some(PathBuf::from(expanded.as_ref()));
        }

        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(None, environment)
}
