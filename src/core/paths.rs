use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default project config file, relative to the working directory.
pub const CONFIG_FILE: &str = "provision.json";

const LEDGER_FILE: &str = ".configuration.json";
const LOCK_FILE: &str = ".lock";

/// Expand `~` and `$VAR` references in a configured path.
pub fn expand(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| {
        Error::config_invalid_value("path", Some(raw.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Namespace directory holding one network's deployment records
pub fn namespace(deployments_dir: &Path, network: &str) -> PathBuf {
    deployments_dir.join(network)
}

/// Deployment record file for a unit
pub fn record(namespace_dir: &Path, unit: &str) -> PathBuf {
    namespace_dir.join(format!("{}.json", unit))
}

/// Configuration ledger (factory bindings, capability grants)
pub fn ledger(namespace_dir: &Path) -> PathBuf {
    namespace_dir.join(LEDGER_FILE)
}

/// Run-level lock file
pub fn lock(namespace_dir: &Path) -> PathBuf {
    namespace_dir.join(LOCK_FILE)
}

/// Whether a namespace entry is a unit record rather than bookkeeping.
pub fn is_record_file(path: &Path) -> bool {
    let is_hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));
    !is_hidden && path.extension().is_some_and(|ext| ext == "json")
}
