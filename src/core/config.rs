use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ConfirmationPolicy;
use crate::defaults::{NetworkConfig, ProvisionConfig, BUILTIN_NETWORK};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use crate::paths;

/// How a network is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkTarget {
    /// In-process auto-mining chain with a non-persisted namespace.
    InMemory,
    Rpc { url: String },
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct ResolvedNetwork {
    pub name: String,
    pub target: NetworkTarget,
    pub settings: NetworkConfig,
}

impl ResolvedNetwork {
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            confirmations: self.settings.confirmations.max(1),
            timeout: Duration::from_secs(self.settings.timeout_secs),
            poll_interval: Duration::from_millis(self.settings.poll_interval_ms),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.target != NetworkTarget::InMemory
    }
}

/// Load provision.json.
///
/// An explicit path must exist; the default path falls back to built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<ProvisionConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(paths::CONFIG_FILE), false),
    };

    if !path.exists() {
        if required {
            return Err(Error::missing_configuration(
                "config",
                Some(path.display().to_string()),
            ));
        }
        return Ok(ProvisionConfig::default());
    }

    let content = local_files::local().read(&path)?;
    parse(&content, &path.display().to_string())
}

pub(crate) fn parse(content: &str, origin: &str) -> Result<ProvisionConfig> {
    serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))
}

/// Resolve a network name against the config and environment.
pub fn resolve_network(
    config: &ProvisionConfig,
    name: &str,
    env: &Environment,
) -> Result<ResolvedNetwork> {
    let settings = match config.networks.get(name) {
        Some(settings) => settings.clone(),
        None if name == BUILTIN_NETWORK => NetworkConfig::default(),
        None => {
            let mut tried: Vec<String> = config.networks.keys().cloned().collect();
            tried.push(BUILTIN_NETWORK.to_string());
            return Err(Error::validation_invalid_argument(
                "network",
                format!("Unknown network '{}'", name),
                Some(name.to_string()),
                Some(tried),
            ));
        }
    };

    let url = match (&settings.rpc_url, &settings.rpc_url_env) {
        (Some(url), _) if !url.trim().is_empty() => Some(url.clone()),
        (_, Some(var)) => Some(env.require(var)?.to_string()),
        _ => None,
    };

    let target = match url {
        Some(url) => NetworkTarget::Rpc { url },
        None if name == BUILTIN_NETWORK => NetworkTarget::InMemory,
        None => {
            return Err(Error::missing_configuration(
                format!("networks.{}.rpcUrl", name),
                None,
            ))
        }
    };

    Ok(ResolvedNetwork {
        name: name.to_string(),
        target,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn config() -> ProvisionConfig {
        parse(
            r#"{
                "networks": {
                    "goerli": { "rpcUrlEnv": "GOERLI_RPC", "confirmations": 2 },
                    "localhost": { "rpcUrl": "http://127.0.0.1:8545" },
                    "broken": {}
                }
            }"#,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn hardhat_is_builtin_in_memory() {
        let net = resolve_network(&config(), "hardhat", &Environment::new()).unwrap();
        assert_eq!(net.target, NetworkTarget::InMemory);
        assert!(!net.is_persistent());
    }

    #[test]
    fn rpc_url_read_from_environment() {
        let env = Environment::new().with("GOERLI_RPC", "https://rpc.example");
        let net = resolve_network(&config(), "goerli", &env).unwrap();
        assert_eq!(
            net.target,
            NetworkTarget::Rpc {
                url: "https://rpc.example".to_string()
            }
        );
        assert_eq!(net.confirmation_policy().confirmations, 2);
    }

    #[test]
    fn missing_rpc_env_is_missing_configuration() {
        let err = resolve_network(&config(), "goerli", &Environment::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingKey);
        assert_eq!(err.details["key"], "GOERLI_RPC");
    }

    #[test]
    fn network_without_endpoint_is_rejected() {
        let err = resolve_network(&config(), "broken", &Environment::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingKey);
    }

    #[test]
    fn unknown_network_lists_known_ones() {
        let err = resolve_network(&config(), "mainnet", &Environment::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        let tried = err.details["tried"].as_array().unwrap();
        assert!(tried.iter().any(|v| v == "localhost"));
        assert!(tried.iter().any(|v| v == "hardhat"));
    }

    #[test]
    fn invalid_json_reports_origin() {
        let err = parse("{", "provision.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
        assert_eq!(err.details["path"], "provision.json");
    }
}
