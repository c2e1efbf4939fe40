//! Executes deployment units in dependency order, once per namespace.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::abi::Token;
use crate::address_book::{AddressBook, DeploymentRecord, PendingAction, RecordMode};
use crate::chain::{self, ChainClient, ConfirmationPolicy, Settled};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::pipeline::{self, ArgSource, UnitSpec};
use crate::types::{Address, TxHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Already recorded; the stored address was reused.
    Skipped,
    Deployed,
}

/// What happened to one unit during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutcome {
    pub name: String,
    pub contract_kind: String,
    pub status: UnitStatus,
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct Orchestrator<'a> {
    chain: &'a dyn ChainClient,
    book: &'a mut AddressBook,
    env: &'a Environment,
    policy: ConfirmationPolicy,
    redeploy: BTreeSet<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        book: &'a mut AddressBook,
        env: &'a Environment,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            chain,
            book,
            env,
            policy,
            redeploy: BTreeSet::new(),
        }
    }

    /// Units to deploy again even though they are recorded.
    pub fn with_redeploy<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redeploy.extend(units.into_iter().map(Into::into));
        self
    }

    pub fn chain(&self) -> &'a dyn ChainClient {
        self.chain
    }

    pub fn book(&self) -> &AddressBook {
        self.book
    }

    pub fn book_mut(&mut self) -> &mut AddressBook {
        self.book
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Deploy every unit in topological order.
    ///
    /// Stops at the first failing unit. Units confirmed before the failure
    /// stay recorded, so a rerun resumes at the failed unit.
    pub fn run(&mut self, units: &[UnitSpec]) -> Result<Vec<UnitOutcome>> {
        let known: BTreeSet<&str> = units.iter().map(|u| u.name.as_str()).collect();
        if let Some(unknown) = self.redeploy.iter().find(|name| !known.contains(name.as_str())) {
            return Err(Error::validation_invalid_argument(
                "redeploy",
                format!("Unknown unit '{}'", unknown),
                Some(unknown.clone()),
                Some(known.iter().map(|s| s.to_string()).collect()),
            ));
        }

        let ordered = pipeline::order_units(units)?;
        let mut outcomes = Vec::with_capacity(ordered.len());
        for unit in &ordered {
            let outcome = self
                .provision_unit(unit)
                .map_err(|e| e.with_step(&unit.name))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Deploy one unit unless it is already recorded.
    ///
    /// A creation left unconfirmed by an earlier run is settled first and is
    /// only submitted again once the node shows it dropped or reverted.
    pub fn provision_unit(&mut self, unit: &UnitSpec) -> Result<UnitOutcome> {
        let redeploy = self.redeploy.contains(&unit.name);

        if let Some(outcome) = self.settle_pending(unit)? {
            return Ok(outcome);
        }

        if !redeploy {
            if let Some(existing) = self.book.record_for(&unit.name) {
                return self.reuse(unit, existing);
            }
        }

        let args = self.resolve_args(unit)?;

        crate::log_status!("provision", "Deploying {} ({})", unit.name, unit.contract_kind);
        let (address, tx) = self.chain.deploy_contract(&unit.contract_kind, &args)?;
        self.book.record_pending(
            &unit.name,
            tx,
            PendingAction::Deploy {
                contract_kind: unit.contract_kind.clone(),
                address,
                constructor_args: args.clone(),
            },
        )?;
        chain::confirm(self.chain, self.book, &unit.name, &unit.name, tx, &self.policy)?;

        let outcome =
            self.record_deployment(&unit.name, &unit.contract_kind, address, args, tx, redeploy)?;
        eprintln!("[provision] deployed {} at {} (tx {})", unit.name, address, tx);
        Ok(outcome)
    }

    fn settle_pending(&mut self, unit: &UnitSpec) -> Result<Option<UnitOutcome>> {
        let Some(pending) = self.book.pending(&unit.name).cloned() else {
            return Ok(None);
        };
        let PendingAction::Deploy {
            contract_kind,
            address,
            constructor_args,
        } = pending.action
        else {
            return Ok(None);
        };
        let tx = pending.transaction_hash;

        match chain::settle(self.chain, &unit.name, tx, &self.policy)? {
            Settled::Confirmed => {
                eprintln!(
                    "[provision] {} from an earlier run confirmed at {} (tx {})",
                    unit.name, address, tx
                );
                let replaces = self.book.record_exists(&unit.name);
                let mut outcome = self.record_deployment(
                    &unit.name,
                    &contract_kind,
                    address,
                    constructor_args,
                    tx,
                    replaces,
                )?;
                outcome
                    .warnings
                    .push("Confirmed a creation submitted by an earlier run".to_string());
                Ok(Some(outcome))
            }
            Settled::Dropped | Settled::Reverted => {
                eprintln!(
                    "[provision] earlier creation of {} (tx {}) did not land; submitting again",
                    unit.name, tx
                );
                self.book.clear_pending(&unit.name)?;
                Ok(None)
            }
        }
    }

    fn record_deployment(
        &mut self,
        name: &str,
        contract_kind: &str,
        address: Address,
        constructor_args: Vec<Token>,
        tx: TxHash,
        replace: bool,
    ) -> Result<UnitOutcome> {
        let mode = if replace {
            RecordMode::Redeploy
        } else {
            RecordMode::Strict
        };
        self.book.record(
            DeploymentRecord {
                name: name.to_string(),
                contract_kind: contract_kind.to_string(),
                address,
                constructor_args,
                transaction_hash: tx,
                network: self.book.network().to_string(),
                deployed_at: Some(chrono::Utc::now().to_rfc3339()),
            },
            mode,
        )?;

        Ok(UnitOutcome {
            name: name.to_string(),
            contract_kind: contract_kind.to_string(),
            status: UnitStatus::Deployed,
            address,
            transaction_hash: Some(tx),
            warnings: Vec::new(),
        })
    }

    fn reuse(&self, unit: &UnitSpec, existing: &DeploymentRecord) -> Result<UnitOutcome> {
        let mut warnings = Vec::new();
        if existing.contract_kind != unit.contract_kind {
            warnings.push(format!(
                "Recorded as {} but planned as {}",
                existing.contract_kind, unit.contract_kind
            ));
        }
        if self.resolve_args(unit)? != existing.constructor_args {
            warnings.push(
                "Constructor arguments changed since deployment; pass --redeploy to replace"
                    .to_string(),
            );
        }

        eprintln!("[provision] reusing {} at {}", unit.name, existing.address);
        Ok(UnitOutcome {
            name: unit.name.clone(),
            contract_kind: existing.contract_kind.clone(),
            status: UnitStatus::Skipped,
            address: existing.address,
            transaction_hash: None,
            warnings,
        })
    }

    fn resolve_args(&self, unit: &UnitSpec) -> Result<Vec<Token>> {
        unit.args
            .iter()
            .map(|arg| match arg {
                ArgSource::Unit(dep) => {
                    if !self.book.record_exists(dep) {
                        return Err(Error::dependency_not_ready(&unit.name, dep));
                    }
                    self.book.get(dep).map(Token::Address)
                }
                ArgSource::Param(key) => self.env.require_address(key).map(Token::Address),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::error::ErrorCode;

    fn units() -> Vec<UnitSpec> {
        vec![
            UnitSpec::new("Registry", "DelegationWalletRegistry"),
            UnitSpec::new("Factory", "DelegationWalletFactory").unit_arg("Registry"),
        ]
    }

    #[test]
    fn deploys_then_skips_on_rerun() {
        let chain = MemoryChain::default();
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");

        let first = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();
        assert!(first.iter().all(|o| o.status == UnitStatus::Deployed));

        let second = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();
        assert!(second.iter().all(|o| o.status == UnitStatus::Skipped));
        assert_eq!(chain.transaction_count(), 2);
        assert_eq!(
            first.iter().map(|o| o.address).collect::<Vec<_>>(),
            second.iter().map(|o| o.address).collect::<Vec<_>>()
        );
    }

    #[test]
    fn dependency_address_is_passed_to_constructor() {
        let chain = MemoryChain::default();
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");
        Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();

        let registry = book.get("Registry").unwrap();
        let factory = book.get("Factory").unwrap();
        assert_eq!(
            chain.contract(factory).unwrap().args,
            vec![Token::Address(registry)]
        );
    }

    #[test]
    fn unprocessed_dependency_is_not_ready() {
        let chain = MemoryChain::default();
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut orchestrator =
            Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default());

        let err = orchestrator.provision_unit(&units()[1]).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanDependencyNotReady);
        assert_eq!(err.details["dependency"], "Registry");
        assert_eq!(chain.transaction_count(), 0);
    }

    #[test]
    fn redeploy_replaces_record() {
        let chain = MemoryChain::default();
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");
        Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();
        let before = book.get("Factory").unwrap();

        let outcomes = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .with_redeploy(["Factory"])
            .run(&units())
            .unwrap();
        assert_eq!(outcomes[0].status, UnitStatus::Skipped);
        assert_eq!(outcomes[1].status, UnitStatus::Deployed);
        assert_ne!(book.get("Factory").unwrap(), before);
    }

    #[test]
    fn unknown_redeploy_unit_is_rejected() {
        let chain = MemoryChain::default();
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");
        let err = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .with_redeploy(["Nope"])
            .run(&units())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        assert_eq!(chain.transaction_count(), 0);
    }

    #[test]
    fn timed_out_creation_is_awaited_not_resubmitted() {
        let chain = MemoryChain::default();
        chain.stall_next_deploy("DelegationWalletFactory");
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");

        let err = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        let pending = book.pending("Factory").unwrap().clone();
        let sent = chain.transaction_count();

        let err = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        assert_eq!(chain.transaction_count(), sent);

        chain.release_stalled();
        let outcomes = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();
        assert_eq!(outcomes[1].status, UnitStatus::Deployed);
        assert_eq!(outcomes[1].transaction_hash, Some(pending.transaction_hash));
        assert_eq!(chain.transaction_count(), sent);
        assert!(book.pending("Factory").is_none());
        assert_eq!(
            book.record_for("Factory").unwrap().transaction_hash,
            pending.transaction_hash
        );
    }

    #[test]
    fn dropped_creation_is_submitted_again() {
        let chain = MemoryChain::default();
        chain.stall_next_deploy("DelegationWalletFactory");
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");

        Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap_err();
        let stalled = book.pending("Factory").unwrap().transaction_hash;
        chain.drop_stalled();

        let outcomes = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap();
        assert_eq!(outcomes[1].status, UnitStatus::Deployed);
        assert_ne!(outcomes[1].transaction_hash, Some(stalled));
        let creations = chain
            .transactions()
            .iter()
            .filter(|t| t.description == "create DelegationWalletFactory")
            .count();
        assert_eq!(creations, 1);
    }

    #[test]
    fn reuse_reports_unresolvable_arguments() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        let unit = vec![UnitSpec::new("Factory", "DelegationWalletFactory").param_arg("TEMPLATE")];
        let good = Environment::new().with("TEMPLATE", "0xd9db270c1b5e3bd161e8c8503c55ceabee709552");
        Orchestrator::new(&chain, &mut book, &good, ConfirmationPolicy::default())
            .run(&unit)
            .unwrap();

        let bad = Environment::new().with("TEMPLATE", "0x1234");
        let err = Orchestrator::new(&chain, &mut book, &bad, ConfirmationPolicy::default())
            .run(&unit)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["step"], "Factory");
        assert_eq!(chain.transaction_count(), 1);
    }

    #[test]
    fn failed_unit_is_not_recorded() {
        let chain = MemoryChain::default();
        chain.fail_next_deploy("DelegationWalletFactory");
        let env = Environment::new();
        let mut book = AddressBook::ephemeral("hardhat");

        let err = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&units())
            .unwrap_err();
        assert_eq!(err.details["step"], "Factory");
        assert!(book.record_exists("Registry"));
        assert!(!book.record_exists("Factory"));
    }
}
