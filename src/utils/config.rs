// src/utils/config.rs
//! Node configuration
//!
//! Layers an optional `acqnode.toml` file with `ACQNODE_*` environment
//! overrides (e.g. `ACQNODE_SERVER__PORT=5555`).

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Command server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared namespace service settings
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Sampling layer settings
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// Command server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum connections handled at once. The default of 1 keeps the
    /// accept loop strictly sequential.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Full shutdown join timeout, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Shared namespace service settings
#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceConfig {
    /// Whether the controller hosts a namespace service for isolated workers
    #[serde(default)]
    pub enabled: bool,
}

/// Sampling layer settings
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Names of the sensors to sample
    #[serde(default)]
    pub enabled_sensors: Vec<String>,

    /// Per-sensor frequency overrides, in Hz
    #[serde(default)]
    pub custom_frequencies: HashMap<String, f64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5555
}

fn default_max_inflight() -> usize {
    1
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_inflight: default_max_inflight(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled_sensors: Vec::new(),
            custom_frequencies: HashMap::new(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            namespace: NamespaceConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from `acqnode.toml` (if present) and the
    /// environment.
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name("acqnode").required(false))
            .add_source(Environment::with_prefix("ACQNODE").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 5555);
        assert_eq!(cfg.server.max_inflight, 1);
        assert!(!cfg.namespace.enabled);
        assert!(cfg.sampling.enabled_sensors.is_empty());
    }
}
