use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Address;

/// Name of the built-in in-process network.
pub const BUILTIN_NETWORK: &str = "hardhat";

/// Root configuration structure for provision.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionConfig {
    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: String,

    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,

    #[serde(default = "default_env_file")]
    pub env_file: String,

    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            deployments_dir: default_deployments_dir(),
            artifacts_dir: default_artifacts_dir(),
            env_file: default_env_file(),
            networks: BTreeMap::new(),
        }
    }
}

/// Per-network connection and confirmation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// JSON-RPC endpoint. Takes precedence over `rpc_url_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,

    /// Environment variable holding the JSON-RPC endpoint (e.g. `GOERLI_RPC`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url_env: Option<String>,

    /// Deploying account. Defaults to the node's first account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,

    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            rpc_url_env: None,
            deployer: None,
            confirmations: default_confirmations(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            gas_limit: None,
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_deployments_dir() -> String {
    "deployments".to_string()
}

fn default_artifacts_dir() -> String {
    "artifacts".to_string()
}

fn default_env_file() -> String {
    ".env".to_string()
}

fn default_confirmations() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}
