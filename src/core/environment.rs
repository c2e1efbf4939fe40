//! External parameters and the fail-fast precondition check.
//!
//! The pipeline never reads `std::env` directly. It works from an
//! [`Environment`] snapshot taken once per run, which keeps validation
//! side-effect free and lets tests inject parameters.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use crate::types::Address;

/// Fallback handler installed on every wallet's Safe.
pub const FALLBACK_HANDLER: &str = "COMPATIBILITY_FALLBACK_HANDLER";
/// Safe singleton the wallet proxies are cloned from.
pub const SAFE_TEMPLATE: &str = "GNOSIS_SAFE_TEMPLATE";
/// Safe proxy factory.
pub const SAFE_PROXY_FACTORY: &str = "GNOSIS_SAFE_PROXY_FACTORY";

pub const REQUIRED: [&str; 3] = [FALLBACK_HANDLER, SAFE_TEMPLATE, SAFE_PROXY_FACTORY];

#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process environment seeded with a dotenv file; process values win.
    pub fn load(env_file: &Path) -> Result<Self> {
        let mut env = Self::new();
        if env_file.exists() {
            let content = local_files::local().read(env_file)?;
            env.merge_dotenv(&content);
        }
        for (key, value) in std::env::vars() {
            env.vars.insert(key, value);
        }
        Ok(env)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Non-empty value or `MissingConfiguration(key)`.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::missing_configuration(key, None)),
        }
    }

    pub fn require_address(&self, key: &str) -> Result<Address> {
        crate::types::parse_address(key, self.require(key)?)
    }

    fn merge_dotenv(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                self.vars.insert(key.trim().to_string(), value.to_string());
            }
        }
    }
}

/// Checks every required parameter before the first transaction.
pub struct EnvironmentValidator<'a> {
    required: &'a [&'a str],
}

impl<'a> EnvironmentValidator<'a> {
    pub fn new(required: &'a [&'a str]) -> Self {
        Self { required }
    }

    /// The platform's required Safe parameters.
    pub fn platform() -> EnvironmentValidator<'static> {
        EnvironmentValidator::new(&REQUIRED)
    }

    /// Fails on the first absent, empty or malformed parameter, in declaration order.
    pub fn validate(&self, env: &Environment) -> Result<()> {
        for key in self.required {
            env.require_address(key)?;
        }
        Ok(())
    }
}
