//! Compiled contract lookup in a Hardhat artifacts tree.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractArtifact {
    #[serde(default)]
    contract_name: Option<String>,
    bytecode: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate `<root>/**/<kind>.json`.
    pub fn find(&self, kind: &str) -> Result<PathBuf> {
        let pattern = format!(
            "{}/**/{}.json",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            kind
        );
        let paths = glob::glob(&pattern).map_err(|e| {
            Error::config_invalid_value("artifactsDir", Some(pattern.clone()), e.to_string())
        })?;

        // build-info holds compiler inputs, not contract artifacts
        paths
            .flatten()
            .find(|path| !path.components().any(|c| c.as_os_str() == "build-info"))
            .ok_or_else(|| Error::artifact_not_found(kind, self.root.display().to_string()))
    }

    /// Creation bytecode for a contract kind.
    pub fn bytecode(&self, kind: &str) -> Result<Vec<u8>> {
        let path = self.find(kind)?;
        let content = local_files::local().read(&path)?;
        let artifact: ContractArtifact = serde_json::from_str(&content).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("parse {}", path.display())))
        })?;

        if let Some(name) = artifact.contract_name.as_deref() {
            if name != kind {
                return Err(Error::artifact_not_found(kind, path.display().to_string()));
            }
        }

        let digits = artifact.bytecode.trim_start_matches("0x");
        if digits.is_empty() {
            // interfaces and abstract contracts compile to empty bytecode
            return Err(Error::artifact_not_found(kind, path.display().to_string())
                .with_hint(format!("'{}' has no creation bytecode", kind)));
        }

        alloy_primitives::hex::decode(digits).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("decode bytecode of {}", kind)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    fn write_artifact(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn finds_nested_artifact() {
        let dir = tempdir().unwrap();
        write_artifact(
            dir.path(),
            "src/DelegationRecipes.sol/DelegationRecipes.json",
            r#"{"contractName":"DelegationRecipes","bytecode":"0x6080"}"#,
        );
        write_artifact(
            dir.path(),
            "src/DelegationRecipes.sol/DelegationRecipes.dbg.json",
            r#"{"buildInfo":"x"}"#,
        );

        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.bytecode("DelegationRecipes").unwrap(), vec![0x60, 0x80]);
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempdir().unwrap();
        let err = ArtifactStore::new(dir.path()).bytecode("TestNft").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArtifactNotFound);
    }

    #[test]
    fn empty_bytecode_is_rejected() {
        let dir = tempdir().unwrap();
        write_artifact(
            dir.path(),
            "src/IGuard.sol/IGuard.json",
            r#"{"contractName":"IGuard","bytecode":"0x"}"#,
        );
        let err = ArtifactStore::new(dir.path()).bytecode("IGuard").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArtifactNotFound);
    }
}
