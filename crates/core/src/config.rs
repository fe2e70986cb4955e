use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the control plane, loadable from a JSON
/// file. Every field has a default so partial files are fine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    #[serde(default = "default_task_timeout")]
    pub default_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            default_timeout_seconds: default_task_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Error rate above which a warning is logged (0.0 - 1.0).
    #[serde(default = "default_error_rate")]
    pub error_rate_threshold: f64,
    /// Average latency above which a warning is logged.
    #[serde(default = "default_latency_ms")]
    pub latency_threshold_ms: u64,
    /// Average or observed memory above which a warning is logged.
    #[serde(default = "default_memory_bytes")]
    pub memory_threshold_bytes: u64,
    /// Minimum calls before thresholds are evaluated.
    #[serde(default = "default_min_calls")]
    pub min_calls: u64,
    #[serde(default = "default_health_ttl")]
    pub store_ttl_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: default_error_rate(),
            latency_threshold_ms: default_latency_ms(),
            memory_threshold_bytes: default_memory_bytes(),
            min_calls: default_min_calls(),
            store_ttl_seconds: default_health_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_ttl")]
    pub store_ttl_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store_ttl_seconds: default_registry_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacConfig {
    #[serde(default = "default_audit_size")]
    pub audit_log_size: usize,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            audit_log_size: default_audit_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Directory names skipped during a scan.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            excluded_dirs: default_excluded_dirs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_task_timeout() -> u64 {
    3600
}

fn default_error_rate() -> f64 {
    0.05
}

fn default_latency_ms() -> u64 {
    1000
}

fn default_memory_bytes() -> u64 {
    128 * 1024 * 1024
}

fn default_min_calls() -> u64 {
    1
}

fn default_health_ttl() -> u64 {
    300
}

fn default_registry_ttl() -> u64 {
    3600
}

fn default_audit_size() -> usize {
    1000
}

fn default_excluded_dirs() -> Vec<String> {
    ["target", "vendor", ".git", "node_modules", "tests"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
