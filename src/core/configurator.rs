//! Configuration transactions against deployed singletons.
//!
//! Both actions consult the namespace ledger first, so a rerun submits
//! nothing for facts that are already in place. A transaction an earlier
//! run left unconfirmed is settled before anything new is sent.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::abi::Token;
use crate::address_book::{AddressBook, PendingAction};
use crate::capability::{self, CapabilityGrant, GrantKey};
use crate::chain::{self, ChainClient, ConfirmationPolicy, Settled};
use crate::error::{Error, Result};
use crate::platform::SET_FACTORY_SIGNATURE;
use crate::types::{Address, Selector, TxHash};

pub const BIND_FACTORY: &str = "bindFactory";
pub const GRANT_CAPABILITIES: &str = "grantCapabilities";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Applied,
    /// Already in effect according to the ledger; nothing was sent.
    Skipped,
    Failed,
}

/// Error of a failed action, in the shape of the CLI error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl From<&Error> for ActionError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOutcome {
    pub action: String,
    pub status: ConfigStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ConfigOutcome {
    fn new(action: &str, status: ConfigStatus) -> Self {
        Self {
            action: action.to_string(),
            status,
            subject: None,
            transaction_hash: None,
            message: None,
            error: None,
        }
    }

    /// Report a failed action without aborting the run.
    pub fn failed(action: &str, err: &Error) -> Self {
        let mut outcome = Self::new(action, ConfigStatus::Failed);
        outcome.message = Some(err.message.clone());
        outcome.error = Some(ActionError::from(err));
        outcome
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    fn resumed(action: &str, tx: TxHash) -> Self {
        let mut outcome = Self::new(action, ConfigStatus::Applied);
        outcome.transaction_hash = Some(tx);
        outcome.message = Some("confirmed a transaction submitted by an earlier run".to_string());
        outcome
    }
}

pub struct PostDeployConfigurator<'a> {
    chain: &'a dyn ChainClient,
    book: &'a mut AddressBook,
    policy: ConfirmationPolicy,
}

impl<'a> PostDeployConfigurator<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        book: &'a mut AddressBook,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            chain,
            book,
            policy,
        }
    }

    pub fn book(&self) -> &AddressBook {
        self.book
    }

    /// Make `factory` the one factory `registry` trusts.
    ///
    /// Rebinding to a different factory replaces the binding.
    pub fn bind_factory(&mut self, registry: Address, factory: Address) -> Result<ConfigOutcome> {
        let key = format!("{}:{}", BIND_FACTORY, registry);
        let resumed = self.settle_pending(&key, BIND_FACTORY)?;

        if self.book.factory_binding(registry) == Some(factory) {
            if let Some(tx) = resumed {
                return Ok(ConfigOutcome::resumed(BIND_FACTORY, tx));
            }
            eprintln!("[configure] {} already bound to factory {}", registry, factory);
            let mut outcome = ConfigOutcome::new(BIND_FACTORY, ConfigStatus::Skipped);
            outcome.message = Some(format!("{} already bound to {}", registry, factory));
            return Ok(outcome);
        }

        let tx = self
            .chain
            .call(registry, SET_FACTORY_SIGNATURE, &[Token::Address(factory)])
            .map_err(|e| e.with_step(BIND_FACTORY))?;
        self.book
            .record_pending(&key, tx, PendingAction::BindFactory { registry, factory })?;
        chain::confirm(self.chain, self.book, &key, BIND_FACTORY, tx, &self.policy)?;
        self.book.record_factory_binding(&key, registry, factory)?;

        eprintln!("[configure] bound {} to factory {} (tx {})", registry, factory, tx);
        let mut outcome = ConfigOutcome::new(BIND_FACTORY, ConfigStatus::Applied);
        outcome.transaction_hash = Some(tx);
        Ok(outcome)
    }

    /// Grant one capability per (target, selector, label) for `asset`.
    ///
    /// Grants already recorded with the same label are skipped. A grant
    /// whose key is recorded, or repeated in this request, with a different
    /// label fails the action before anything is sent.
    pub fn grant_capabilities(
        &mut self,
        registry: Address,
        asset: Address,
        targets: &[Address],
        selectors: &[Selector],
        labels: &[String],
    ) -> Result<ConfigOutcome> {
        let grants = capability::zip_grants(GRANT_CAPABILITIES, asset, targets, selectors, labels)?;
        let key = format!("{}:{}:{}", GRANT_CAPABILITIES, registry, asset);
        let resumed = self.settle_pending(&key, GRANT_CAPABILITIES)?;

        let mut requested: BTreeMap<GrantKey, &str> = BTreeMap::new();
        let mut pending: Vec<CapabilityGrant> = Vec::new();
        let mut present = 0usize;

        for grant in &grants {
            let key = grant.key();
            if let Some(label) = requested.get(&key) {
                if *label != grant.label {
                    return Err(grant.conflict(label).with_step(GRANT_CAPABILITIES));
                }
                continue;
            }
            requested.insert(key, grant.label.as_str());

            match self.book.granted_label(registry, &key) {
                Some(label) if label == grant.label => present += 1,
                Some(label) => return Err(grant.conflict(label).with_step(GRANT_CAPABILITIES)),
                None => pending.push(grant.clone()),
            }
        }

        if pending.is_empty() {
            if let Some(tx) = resumed {
                return Ok(ConfigOutcome::resumed(GRANT_CAPABILITIES, tx));
            }
            eprintln!("[configure] capabilities for {} already granted", asset);
            let mut outcome = ConfigOutcome::new(GRANT_CAPABILITIES, ConfigStatus::Skipped);
            outcome.message = Some(format!("{} grant(s) already present", present));
            return Ok(outcome);
        }

        let tx = self
            .chain
            .call(
                registry,
                capability::ADD_SIGNATURE,
                &capability::add_call_args(asset, &pending),
            )
            .map_err(|e| e.with_step(GRANT_CAPABILITIES))?;
        self.book.record_pending(
            &key,
            tx,
            PendingAction::GrantCapabilities {
                registry,
                grants: pending.clone(),
            },
        )?;
        chain::confirm(self.chain, self.book, &key, GRANT_CAPABILITIES, tx, &self.policy)?;
        self.book.record_grants(&key, registry, &pending, tx)?;

        eprintln!(
            "[configure] granted {} capability(ies) for {} (tx {})",
            pending.len(),
            asset,
            tx
        );
        let mut outcome = ConfigOutcome::new(GRANT_CAPABILITIES, ConfigStatus::Applied);
        outcome.transaction_hash = Some(tx);
        outcome.message = Some(format!(
            "{} granted, {} already present",
            pending.len(),
            present
        ));
        Ok(outcome)
    }

    /// Settle what an earlier run left pending under `key`. Returns the
    /// transaction when it confirmed and its effect is now recorded.
    fn settle_pending(&mut self, key: &str, action: &str) -> Result<Option<TxHash>> {
        let Some(pending) = self.book.pending(key).cloned() else {
            return Ok(None);
        };
        let tx = pending.transaction_hash;

        match chain::settle(self.chain, action, tx, &self.policy)? {
            Settled::Confirmed => {
                match pending.action {
                    PendingAction::BindFactory { registry, factory } => {
                        self.book.record_factory_binding(key, registry, factory)?
                    }
                    PendingAction::GrantCapabilities { registry, grants } => {
                        self.book.record_grants(key, registry, &grants, tx)?
                    }
                    _ => self.book.clear_pending(key)?,
                }
                eprintln!("[configure] {} from an earlier run confirmed (tx {})", action, tx);
                Ok(Some(tx))
            }
            Settled::Dropped | Settled::Reverted => {
                eprintln!(
                    "[configure] earlier {} (tx {}) did not land; submitting again",
                    action, tx
                );
                self.book.clear_pending(key)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::chain::MemoryChain;
    use crate::platform::{CAPABILITY_REGISTRY_KIND, WALLET_REGISTRY_KIND};

    fn selector(raw: &str) -> Selector {
        raw.parse().unwrap()
    }

    #[test]
    fn grant_then_lookup() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(CAPABILITY_REGISTRY_KIND, &[]).unwrap();
        let (asset, _) = chain.deploy_contract("TestNft", &[]).unwrap();
        let (target, _) = chain.deploy_contract("TestNftPlatform", &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());

        let outcome = configurator
            .grant_capabilities(
                registry,
                asset,
                &[target],
                &[selector("0x4816cbdf")],
                &["TestNftPlatform - allowedFunction".to_string()],
            )
            .unwrap();
        assert_eq!(outcome.status, ConfigStatus::Applied);

        assert_eq!(
            chain.capability(registry, asset, target, selector("0x4816cbdf")),
            Some("TestNftPlatform - allowedFunction".to_string())
        );
        assert_eq!(
            chain.capability(registry, asset, target, selector("0x00000001")),
            None
        );
        assert_eq!(
            chain.capability(registry, target, asset, selector("0x4816cbdf")),
            None
        );
    }

    #[test]
    fn recorded_grants_are_not_sent_twice() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(CAPABILITY_REGISTRY_KIND, &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());
        let asset = Address::repeat_byte(1);
        let target = Address::repeat_byte(2);
        let labels = ["label".to_string()];

        configurator
            .grant_capabilities(registry, asset, &[target], &[selector("0x4816cbdf")], &labels)
            .unwrap();
        let sent = chain.transaction_count();

        let again = configurator
            .grant_capabilities(registry, asset, &[target], &[selector("0x4816cbdf")], &labels)
            .unwrap();
        assert_eq!(again.status, ConfigStatus::Skipped);
        assert_eq!(chain.transaction_count(), sent);
        assert_eq!(chain.grant_count(registry), 1);
    }

    #[test]
    fn conflicting_label_fails_before_sending() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(CAPABILITY_REGISTRY_KIND, &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());
        let asset = Address::repeat_byte(1);
        let target = Address::repeat_byte(2);

        configurator
            .grant_capabilities(
                registry,
                asset,
                &[target],
                &[selector("0x4816cbdf")],
                &["first".to_string()],
            )
            .unwrap();
        let sent = chain.transaction_count();

        let err = configurator
            .grant_capabilities(
                registry,
                asset,
                &[target],
                &[selector("0x4816cbdf")],
                &["second".to_string()],
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityConflict);
        assert_eq!(err.details["existingLabel"], "first");
        assert_eq!(chain.transaction_count(), sent);
    }

    #[test]
    fn arity_mismatch_sends_nothing() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(CAPABILITY_REGISTRY_KIND, &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());

        let err = configurator
            .grant_capabilities(
                registry,
                Address::repeat_byte(1),
                &[Address::repeat_byte(2), Address::repeat_byte(3)],
                &[selector("0x4816cbdf")],
                &["only one".to_string()],
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationArityMismatch);
        assert_eq!(chain.transaction_count(), 1);
    }

    #[test]
    fn timed_out_binding_is_awaited_on_retry() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(WALLET_REGISTRY_KIND, &[]).unwrap();
        let factory = Address::repeat_byte(0xaa);
        chain.stall_next_call(SET_FACTORY_SIGNATURE);
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());

        let err = configurator.bind_factory(registry, factory).unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        assert_eq!(configurator.book().factory_binding(registry), None);
        let sent = chain.transaction_count();

        let err = configurator.bind_factory(registry, factory).unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        assert_eq!(chain.transaction_count(), sent);

        chain.release_stalled();
        let outcome = configurator.bind_factory(registry, factory).unwrap();
        assert_eq!(outcome.status, ConfigStatus::Applied);
        assert_eq!(chain.transaction_count(), sent);
        assert_eq!(chain.wallet_factory(registry), Some(factory));
        assert_eq!(configurator.book().factory_binding(registry), Some(factory));
        assert!(configurator.book().ledger().pending.is_empty());
    }

    #[test]
    fn dropped_grant_is_sent_again() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(CAPABILITY_REGISTRY_KIND, &[]).unwrap();
        chain.stall_next_deploy("TestNft");
        chain.deploy_contract("TestNft", &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());
        let asset = Address::repeat_byte(1);
        let target = Address::repeat_byte(2);
        let labels = ["label".to_string()];

        // queued behind the stalled creation
        let err = configurator
            .grant_capabilities(registry, asset, &[target], &[selector("0x4816cbdf")], &labels)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        assert_eq!(configurator.book().ledger().pending.len(), 1);

        chain.drop_stalled();
        let outcome = configurator
            .grant_capabilities(registry, asset, &[target], &[selector("0x4816cbdf")], &labels)
            .unwrap();
        assert_eq!(outcome.status, ConfigStatus::Applied);
        assert_eq!(chain.grant_count(registry), 1);
        assert_eq!(configurator.book().ledger().capability_grants.len(), 1);
        assert!(configurator.book().ledger().pending.is_empty());
    }

    #[test]
    fn reverted_binding_is_not_recorded() {
        let chain = MemoryChain::default();
        chain.stall_next_deploy("TestNft");
        let (not_a_registry, _) = chain.deploy_contract("TestNft", &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());
        let factory = Address::repeat_byte(0xaa);

        configurator.bind_factory(not_a_registry, factory).unwrap_err();
        chain.release_stalled();

        let err = configurator.bind_factory(not_a_registry, factory).unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainTransactionReverted);
        assert_eq!(configurator.book().factory_binding(not_a_registry), None);
        assert!(configurator.book().ledger().pending.is_empty());
    }

    #[test]
    fn rebinding_factory_is_last_write_wins() {
        let chain = MemoryChain::default();
        let (registry, _) = chain.deploy_contract(WALLET_REGISTRY_KIND, &[]).unwrap();
        let mut book = AddressBook::ephemeral("hardhat");
        let mut configurator =
            PostDeployConfigurator::new(&chain, &mut book, ConfirmationPolicy::default());
        let first = Address::repeat_byte(0xaa);
        let second = Address::repeat_byte(0xbb);

        configurator.bind_factory(registry, first).unwrap();
        configurator.bind_factory(registry, second).unwrap();
        assert_eq!(chain.wallet_factory(registry), Some(second));
        assert_eq!(configurator.book().factory_binding(registry), Some(second));

        let sent = chain.transaction_count();
        let same = configurator.bind_factory(registry, second).unwrap();
        assert_eq!(same.status, ConfigStatus::Skipped);
        assert_eq!(chain.transaction_count(), sent);
    }
}
