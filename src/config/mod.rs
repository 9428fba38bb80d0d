mod discovery;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::ConfigError;

pub use discovery::expand_environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Cosmos,
    Evm,
    Beacon,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Cosmos => "cosmos",
            NodeKind::Evm => "evm",
            NodeKind::Beacon => "beacon",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NodeConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    pub r#type: NodeKind,
    #[serde(default)]
    pub chain_type: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

impl NodeConfig {
    /// Consistency group key: `chain_type` if set, else `type`.
    pub fn consistency_key(&self) -> String {
        self.chain_type.clone().unwrap_or_else(|| self.r#type.as_str().to_string())
    }

    pub fn service_type(&self) -> Option<&str> {
        self.metadata.get("service_type").map(|s| s.as_str())
    }

    /// The HTTP peer used to probe a WebSocket-only EVM node. Prefers the
    /// dedicated field, falls back to metadata for env-discovered nodes.
    pub fn http_peer_url(&self) -> Option<&str> {
        self.http_url
            .as_deref()
            .or_else(|| self.metadata.get("http_url").map(|s| s.as_str()))
    }

    pub fn is_websocket_service(&self) -> bool {
        self.service_type() == Some("websocket")
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExternalReference {
    pub name: String,
    pub url: String,
    pub r#type: NodeKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    15_000
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BlockValidationConfig {
    #[serde(default = "default_height_threshold")]
    pub height_threshold: i64,
    #[serde(default = "default_external_reference_threshold")]
    pub external_reference_threshold: i64,
}

fn default_height_threshold() -> i64 {
    5
}
fn default_external_reference_threshold() -> i64 {
    10
}

impl Default for BlockValidationConfig {
    fn default() -> Self {
        Self {
            height_threshold: default_height_threshold(),
            external_reference_threshold: default_external_reference_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PerformanceConfig {
    #[serde(default = "default_cache_duration_ms")]
    pub cache_duration_ms: u64,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

fn default_cache_duration_ms() -> u64 {
    30_000
}
fn default_max_concurrent_checks() -> usize {
    10
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            cache_duration_ms: default_cache_duration_ms(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FailureHandlingConfig {
    #[serde(default = "default_min_healthy_nodes")]
    pub min_healthy_nodes: usize,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: f64,
}

fn default_min_healthy_nodes() -> usize {
    1
}
fn default_grace_period_ms() -> u64 {
    60_000
}
fn default_circuit_breaker_threshold() -> f64 {
    0.8
}

impl FailureHandlingConfig {
    /// `failure_threshold = ceil(circuit_breaker_threshold * 10)`.
    pub fn failure_threshold(&self) -> u32 {
        (self.circuit_breaker_threshold * 10.0).ceil().max(1.0) as u32
    }
}

impl Default for FailureHandlingConfig {
    fn default() -> Self {
        Self {
            min_healthy_nodes: default_min_healthy_nodes(),
            grace_period_ms: default_grace_period_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_health_endpoint_path")]
    pub health_endpoint_path: String,
}

fn default_health_endpoint_path() -> String {
    "/health".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: None,
            health_endpoint_path: default_health_endpoint_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub rpc_servers: Option<String>,
    #[serde(default)]
    pub api_servers: Option<String>,
    #[serde(default)]
    pub websocket_servers: Option<String>,
    #[serde(default)]
    pub evm_servers: Option<String>,
    #[serde(default)]
    pub evm_ws_servers: Option<String>,
    #[serde(default)]
    pub generic_servers: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ChainPreset {
    Cosmos,
    CosmosHub,
    Ethereum,
    Althea,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChainConfig {
    #[serde(default)]
    pub chain_type: Option<String>,
    #[serde(default)]
    pub auto_discover_from_env: Option<String>,
    #[serde(default)]
    pub chain_preset: Option<ChainPreset>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    #[serde(default)]
    pub chain: Option<ChainConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub block_validation: BlockValidationConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub failure_handling: FailureHandlingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Validates configured invariants. Must be called
    /// after [`expand_environment`] has run so env-discovered nodes count
    /// toward "at least one node configured."
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if node.url.is_empty() {
                return Err(ConfigError::EmptyUrl(node.name.clone()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateName(node.name.clone()));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    let bytes =
        fs::read(path_ref).with_context(|| format!("failed to read config file {:?}", path_ref))?;
    let ext = path_ref
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "json".to_string());
    let mut cfg: Config = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_slice(&bytes).context("failed to parse YAML config")?,
        _ => serde_json::from_slice(&bytes).context("failed to parse JSON config")?,
    };
    discovery::expand_environment(&mut cfg);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn node(name: &str, url: &str) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            url: url.to_string(),
            api_url: None,
            websocket_url: None,
            http_url: None,
            r#type: NodeKind::Cosmos,
            chain_type: None,
            weight: 1,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn validate_rejects_empty_nodes() {
        let cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoNodes)));
    }

    #[test]
    fn validate_rejects_empty_name() {
        let cfg = Config {
            nodes: vec![node("", "http://a")],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn validate_rejects_empty_url() {
        let cfg = Config {
            nodes: vec![node("a", "")],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyUrl(n)) if n == "a"));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let cfg = Config {
            nodes: vec![node("a", "http://a"), node("a", "http://b")],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateName(n)) if n == "a"));
    }

    #[test]
    fn validate_accepts_well_formed_nodes() {
        let cfg = Config {
            nodes: vec![node("a", "http://a"), node("b", "http://b")],
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_config_round_trips_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"nodes": [{{"name": "a", "url": "http://a:26657", "type": "cosmos"}}]}}"#
        )
        .unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].name, "a");
        assert_eq!(cfg.health_check.interval_ms, default_interval_ms());
    }

    #[test]
    fn load_config_round_trips_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "nodes:\n  - name: a\n    url: http://a:26657\n    type: cosmos\n"
        )
        .unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].name, "a");
    }
}
