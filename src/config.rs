//! Configuration file model.
//!
//! The configuration YAML carries four recognized top-level sections:
//! `variables` (expansion inputs), `connection` (per-device transport
//! descriptors), `settings` (engine defaults), and per-device-class blocks
//! (`compute`, `switch`) that are preserved verbatim for capabilities to
//! consult. Unknown top-level keys are preserved but ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::device::DeviceType;
use crate::output::OutputMode;

/// Transport descriptor for one managed device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub ip: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub tunnel_port: Option<u16>,
}

/// Engine defaults, overridable per step from the flow file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_retry_count: u32,
    pub default_wait_after_seconds: u64,
    pub default_wait_between_retries_seconds: u64,
    pub ssh_timeout: u64,
    pub redfish_timeout: u64,
    /// Flow-level error handler name, run once after a flow failure.
    pub execute_on_error: Option<String>,
    /// Per-step visit cap for jump loop detection.
    pub max_step_visits: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_retry_count: 2,
            default_wait_after_seconds: 0,
            default_wait_between_retries_seconds: 0,
            ssh_timeout: 60,
            redfish_timeout: 120,
            execute_on_error: None,
            max_step_visits: 100,
        }
    }
}

/// Immutable run configuration, loaded once before the engine starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub variables: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub connection: BTreeMap<DeviceType, BTreeMap<String, ConnectionConfig>>,
    #[serde(default)]
    pub settings: Settings,
    /// Device-class blocks (`compute:`, `switch:`) and any other top-level
    /// keys, kept as raw YAML for capabilities that need them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Configuration {
    /// Load and parse the configuration YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Configuration = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;
        Ok(config)
    }

    /// Look up a connection entry.
    pub fn connection_for(&self, device_type: DeviceType, device_id: &str) -> Option<&ConnectionConfig> {
        self.connection.get(&device_type)?.get(device_id)
    }

    /// Resolve the default retry count, preferring `variables.default_retry_count`
    /// over `settings.default_retry_count`.
    pub fn default_retry_count(&self) -> u32 {
        if let Some(value) = self.variables.get("default_retry_count") {
            if let Some(n) = value.as_u64() {
                return n as u32;
            }
            if let Some(s) = value.as_str() {
                if let Ok(n) = s.parse() {
                    return n;
                }
            }
        }
        self.settings.default_retry_count
    }

    /// Output mode from `variables.output_mode`, if present and recognized.
    pub fn output_mode(&self) -> Option<OutputMode> {
        let value = self.variables.get("output_mode")?;
        value.as_str().and_then(OutputMode::parse)
    }

    /// String view of a variable, used by handlers for paths like `nvdebug_path`.
    pub fn variable_str(&self, name: &str) -> Option<String> {
        match self.variables.get(name)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}
