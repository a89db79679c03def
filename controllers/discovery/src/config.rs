//! Controller configuration.
//!
//! Loaded from an optional YAML file named by `DISCOVERY_CONFIG`, then
//! overridden by environment variables. Read-only after startup.

use crate::error::ControllerError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable naming the YAML configuration file
pub const CONFIG_PATH_ENV: &str = "DISCOVERY_CONFIG";

/// Slowest accepted overall retry rate
pub const MIN_RETRY_QPS: f64 = 0.001;

/// Discovery controller configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Cluster name this controller belongs to; configurations naming a
    /// different cluster are ignored
    pub cluster: String,

    /// Name of the Node (cluster mode) or Vm (fleet mode) this agent runs on
    pub node_name: String,

    /// Fleet mode: watch Vm objects instead of pods and nodes
    pub vm_mode: bool,

    /// Extra pod fields, field name to `${...}` pattern
    pub type_pod_fields: BTreeMap<String, String>,

    /// Legacy pod field patterns; merged over `type_pod_fields`
    pub k8s_fields: BTreeMap<String, String>,

    /// Extra node fields, field name to pattern
    pub type_node_fields: BTreeMap<String, String>,

    /// Extra vm fields, field name to pattern
    pub type_vm_fields: BTreeMap<String, String>,

    /// Listen address of the health/metrics server; disabled when unset
    pub probe_address: Option<SocketAddr>,

    /// Work queue retry tuning
    pub retry: RetryConfig,
}

/// Retry tuning for the work queue rate limiter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// First per-item backoff, doubled on each consecutive failure
    pub base_delay_ms: u64,

    /// Cap of the per-item backoff
    pub max_delay_secs: u64,

    /// Overall retry rate across all items
    pub qps: f64,

    /// Overall retry burst
    pub burst: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_secs: 1000,
            qps: 10.0,
            burst: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl Config {
    /// Loads the configuration from `DISCOVERY_CONFIG` and the environment.
    pub fn load() -> Result<Self, ControllerError> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ControllerError::InvalidConfig(format!("read {}: {}", path, e)))?;
                Self::from_yaml(&text)?
            }
            Err(_) => Self::default(),
        };

        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ControllerError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Applies `NODE_NAME`, `LOGGIE_CLUSTER`, `VM_MODE` and `PROBE_ADDR` overrides.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_name) = lookup("NODE_NAME") {
            self.node_name = node_name;
        }
        if let Some(cluster) = lookup("LOGGIE_CLUSTER") {
            self.cluster = cluster;
        }
        if let Some(vm_mode) = lookup("VM_MODE") {
            self.vm_mode = match vm_mode.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                other => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "VM_MODE must be true or false, got {}",
                        other
                    )));
                }
            };
        }
        if let Some(addr) = lookup("PROBE_ADDR") {
            let addr = addr
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_ADDR {}: {}", addr, e)))?;
            self.probe_address = Some(addr);
        }
        Ok(())
    }

    /// Checks required fields and retry bounds.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.node_name.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "NODE_NAME environment variable or nodeName is required".to_string(),
            ));
        }
        if !(self.retry.qps >= MIN_RETRY_QPS) {
            return Err(ControllerError::InvalidConfig(format!(
                "retry.qps must be at least {}",
                MIN_RETRY_QPS
            )));
        }
        if self.retry.burst == 0 {
            return Err(ControllerError::InvalidConfig("retry.burst must be at least 1".to_string()));
        }
        if self.retry.base_delay() > self.retry.max_delay() {
            return Err(ControllerError::InvalidConfig(
                "retry.baseDelayMs must not exceed retry.maxDelaySecs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
cluster: prod
nodeName: node-1
vmMode: true
typePodFields:
  podname: "${_k8s.pod.name}"
retry:
  baseDelayMs: 10
"#;
        let config = Config::from_yaml(yaml).expect("valid config");
        assert_eq!(config.cluster, "prod");
        assert_eq!(config.node_name, "node-1");
        assert!(config.vm_mode);
        assert_eq!(config.type_pod_fields.len(), 1);
        assert_eq!(config.retry.base_delay_ms, 10);
        // Unspecified retry fields keep their defaults
        assert_eq!(config.retry.burst, 100);
        assert_eq!(config.probe_address, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_yaml("cluster: staging\nnodeName: from-file\n").expect("valid config");
        config
            .apply_env(env_of(&[("NODE_NAME", "node-7"), ("VM_MODE", "1"), ("PROBE_ADDR", "0.0.0.0:9196")]))
            .expect("valid env");

        assert_eq!(config.node_name, "node-7");
        assert_eq!(config.cluster, "staging");
        assert!(config.vm_mode);
        assert_eq!(config.probe_address.map(|a| a.port()), Some(9196));
    }

    #[test]
    fn test_invalid_vm_mode() {
        let mut config = Config::default();
        let result = config.apply_env(env_of(&[("VM_MODE", "maybe")]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_requires_node_name() {
        assert!(Config::default().validate().is_err());

        let config = Config {
            node_name: "node-1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = Config {
            node_name: "node-1".to_string(),
            ..Default::default()
        };
        config.retry.qps = 0.0;
        assert!(config.validate().is_err());

        // Positive but too slow to express as a refill period
        config.retry.qps = 1e-20;
        assert!(config.validate().is_err());
        config.retry.qps = f64::NAN;
        assert!(config.validate().is_err());
        config.retry.qps = MIN_RETRY_QPS;
        assert!(config.validate().is_ok());

        config.retry = RetryConfig {
            base_delay_ms: 5_000,
            max_delay_secs: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
