//! Durable record of what has been deployed and configured in a namespace.
//!
//! A namespace is one network's directory under the deployments dir:
//!
//! ```text
//! deployments/<network>/<UnitName>.json     one DeploymentRecord per unit
//! deployments/<network>/.configuration.json factory bindings, grants, beacon
//!                                           upgrades, unconfirmed transactions
//! deployments/<network>/.lock               held while a run is active
//! ```
//!
//! Records are written only after the unit's transaction confirmed. A
//! transaction that was submitted but not confirmed is kept as a pending
//! entry, so the next run settles it instead of submitting it again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::abi::Token;
use crate::capability::{CapabilityGrant, GrantKey};
use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use crate::paths;
use crate::types::{Address, TxHash};

/// Persisted deployment artifact for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub contract_kind: String,
    pub address: Address,
    #[serde(default)]
    pub constructor_args: Vec<Token>,
    pub transaction_hash: TxHash,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedGrant {
    pub registry: Address,
    #[serde(flatten)]
    pub grant: CapabilityGrant,
    pub transaction_hash: TxHash,
}

/// Configuration facts applied to deployed singletons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationLedger {
    /// Wallet registry address -> trusted factory.
    #[serde(default)]
    pub factory_bindings: BTreeMap<Address, Address>,
    #[serde(default)]
    pub capability_grants: Vec<RecordedGrant>,
    /// Beacon address -> implementation set by the last recorded upgrade.
    #[serde(default)]
    pub beacon_implementations: BTreeMap<Address, Address>,
    /// Submitted transactions not yet seen confirmed, by step key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<String, PendingTransaction>,
}

/// A submitted transaction whose outcome is not known yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub transaction_hash: TxHash,
    pub submitted_at: String,
    pub action: PendingAction,
}

/// What a pending transaction does once it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PendingAction {
    Deploy {
        contract_kind: String,
        address: Address,
        constructor_args: Vec<Token>,
    },
    BindFactory {
        registry: Address,
        factory: Address,
    },
    GrantCapabilities {
        registry: Address,
        grants: Vec<CapabilityGrant>,
    },
    UpgradeBeacon {
        beacon: Address,
        implementation: Address,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Refuse to overwrite an existing record.
    Strict,
    /// Replace an existing record.
    Redeploy,
}

/// Run-level lock; the lock file is removed on drop.
#[derive(Debug)]
struct NamespaceLock {
    path: PathBuf,
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        let _ = local_files::local().delete(&self.path);
    }
}

#[derive(Debug)]
pub struct AddressBook {
    network: String,
    dir: Option<PathBuf>,
    records: BTreeMap<String, DeploymentRecord>,
    ledger: ConfigurationLedger,
    lock: Option<NamespaceLock>,
}

impl AddressBook {
    /// Namespace kept only in memory, for ephemeral networks.
    pub fn ephemeral(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            dir: None,
            records: BTreeMap::new(),
            ledger: ConfigurationLedger::default(),
            lock: None,
        }
    }

    /// Load the namespace for `network` under `deployments_dir`.
    pub fn open(deployments_dir: &Path, network: &str) -> Result<Self> {
        let dir = paths::namespace(deployments_dir, network);
        let (records, ledger) = read_namespace(&dir)?;

        Ok(Self {
            network: network.to_string(),
            dir: Some(dir),
            records,
            ledger,
            lock: None,
        })
    }

    /// Take the run-level lock. Ephemeral namespaces need none.
    ///
    /// Records and ledger are read again once the lock is held, so a run that
    /// finished after [`AddressBook::open`] is never overwritten.
    pub fn lock(&mut self) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        if self.lock.is_some() {
            return Ok(());
        }

        let fs = local_files::local();
        fs.ensure_dir(&dir)?;
        let path = paths::lock(&dir);
        let stamp = format!("{} {}\n", std::process::id(), chrono::Utc::now().to_rfc3339());

        if !fs.create_new(&path, &stamp)? {
            let holder = fs.read(&path).map(|c| c.trim().to_string()).unwrap_or_default();
            let pid = holder.split_whitespace().next().and_then(|p| p.parse::<u32>().ok());

            match pid {
                Some(pid) if process_is_gone(pid) => {
                    eprintln!(
                        "[provision] removing stale lock {} left by process {}",
                        path.display(),
                        pid
                    );
                    fs.delete(&path)?;
                    if !fs.create_new(&path, &stamp)? {
                        return Err(Error::registry_locked(
                            &self.network,
                            path.display().to_string(),
                            None,
                        ));
                    }
                }
                _ => {
                    return Err(Error::registry_locked(
                        &self.network,
                        path.display().to_string(),
                        pid,
                    ))
                }
            }
        }
        self.lock = Some(NamespaceLock { path });

        let (records, ledger) = read_namespace(&dir)?;
        self.records = records;
        self.ledger = ledger;
        Ok(())
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    pub fn record_exists(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Address> {
        self.records
            .get(name)
            .map(|r| r.address)
            .ok_or_else(|| Error::unknown_unit(name, Some(self.network.clone())))
    }

    pub fn record_for(&self, name: &str) -> Option<&DeploymentRecord> {
        self.records.get(name)
    }

    /// Records in name order.
    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.values()
    }

    /// Persist a confirmed deployment, then make it visible. A pending entry
    /// for the unit is settled by it.
    pub fn record(&mut self, record: DeploymentRecord, mode: RecordMode) -> Result<()> {
        validate_unit_name(&record.name)?;

        if mode == RecordMode::Strict && self.record_exists(&record.name) {
            return Err(Error::duplicate_unit(&record.name, Some(self.network.clone())));
        }

        if let Some(dir) = self.dir.as_ref() {
            let fs = local_files::local();
            fs.ensure_dir(dir)?;
            fs.write(&paths::record(dir, &record.name), &to_json(&record)?)?;
        }

        let name = record.name.clone();
        self.records.insert(name.clone(), record);
        self.clear_pending(&name)
    }

    pub fn pending(&self, key: &str) -> Option<&PendingTransaction> {
        self.ledger.pending.get(key)
    }

    /// Remember a submitted transaction before waiting on it.
    pub fn record_pending(
        &mut self,
        key: &str,
        transaction_hash: TxHash,
        action: PendingAction,
    ) -> Result<()> {
        let mut next = self.ledger.clone();
        next.pending.insert(
            key.to_string(),
            PendingTransaction {
                transaction_hash,
                submitted_at: chrono::Utc::now().to_rfc3339(),
                action,
            },
        );
        self.commit_ledger(next)
    }

    pub fn clear_pending(&mut self, key: &str) -> Result<()> {
        if !self.ledger.pending.contains_key(key) {
            return Ok(());
        }
        let mut next = self.ledger.clone();
        next.pending.remove(key);
        self.commit_ledger(next)
    }

    pub fn ledger(&self) -> &ConfigurationLedger {
        &self.ledger
    }

    pub fn factory_binding(&self, registry: Address) -> Option<Address> {
        self.ledger.factory_bindings.get(&registry).copied()
    }

    /// Label a grant was recorded with, if it was recorded for `registry`.
    pub fn granted_label(&self, registry: Address, key: &GrantKey) -> Option<&str> {
        self.ledger
            .capability_grants
            .iter()
            .find(|g| g.registry == registry && g.grant.key() == *key)
            .map(|g| g.grant.label.as_str())
    }

    pub fn beacon_implementation(&self, beacon: Address) -> Option<Address> {
        self.ledger.beacon_implementations.get(&beacon).copied()
    }

    /// Record a confirmed binding and settle the pending entry `key`.
    pub fn record_factory_binding(
        &mut self,
        key: &str,
        registry: Address,
        factory: Address,
    ) -> Result<()> {
        let mut next = self.ledger.clone();
        next.factory_bindings.insert(registry, factory);
        next.pending.remove(key);
        self.commit_ledger(next)
    }

    /// Record confirmed grants and settle the pending entry `key`. Grants
    /// already recorded are not added twice.
    pub fn record_grants(
        &mut self,
        key: &str,
        registry: Address,
        grants: &[CapabilityGrant],
        transaction_hash: TxHash,
    ) -> Result<()> {
        let mut next = self.ledger.clone();
        for grant in grants {
            if self.granted_label(registry, &grant.key()).is_none() {
                next.capability_grants.push(RecordedGrant {
                    registry,
                    grant: grant.clone(),
                    transaction_hash,
                });
            }
        }
        next.pending.remove(key);
        self.commit_ledger(next)
    }

    /// Record a confirmed upgrade and settle the pending entry `key`.
    pub fn record_beacon_implementation(
        &mut self,
        key: &str,
        beacon: Address,
        implementation: Address,
    ) -> Result<()> {
        let mut next = self.ledger.clone();
        next.beacon_implementations.insert(beacon, implementation);
        next.pending.remove(key);
        self.commit_ledger(next)
    }

    fn commit_ledger(&mut self, next: ConfigurationLedger) -> Result<()> {
        if let Some(dir) = self.dir.as_ref() {
            let fs = local_files::local();
            fs.ensure_dir(dir)?;
            fs.write(&paths::ledger(dir), &to_json(&next)?)?;
        }
        self.ledger = next;
        Ok(())
    }
}

fn read_namespace(dir: &Path) -> Result<(BTreeMap<String, DeploymentRecord>, ConfigurationLedger)> {
    let fs = local_files::local();

    let mut records = BTreeMap::new();
    for entry in fs.list(dir)? {
        if entry.is_dir || !paths::is_record_file(&entry.path) {
            continue;
        }
        let content = fs.read(&entry.path)?;
        let record: DeploymentRecord = serde_json::from_str(&content).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("parse {}", entry.path.display())))
        })?;
        records.insert(record.name.clone(), record);
    }

    let ledger_path = paths::ledger(dir);
    let ledger = if ledger_path.exists() {
        let content = fs.read(&ledger_path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("parse {}", ledger_path.display())))
        })?
    } else {
        ConfigurationLedger::default()
    };

    Ok((records, ledger))
}

/// Whether the process that wrote a lock file has exited. Only answerable
/// where `/proc` exists; elsewhere the lock is assumed live.
fn process_is_gone(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    pid != std::process::id()
        && proc_root.join("self").exists()
        && !proc_root.join(pid.to_string()).exists()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize record".to_string())))
}

/// Unit names become file names.
fn validate_unit_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::validation_invalid_argument(
            "name",
            "Unit names may contain only letters, digits, '_', '-' and '.'",
            Some(name.to_string()),
            None,
        ))
    }
}
