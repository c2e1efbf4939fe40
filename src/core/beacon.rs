//! Upgrade beacons: an implementation unit plus a beacon pointing at it.
//!
//! Wallet proxies reference the beacon, never the implementation, so moving
//! the beacon's pointer upgrades every proxy at once without changing any
//! proxy address.

use serde::Serialize;

use crate::abi::Token;
use crate::address_book::{AddressBook, PendingAction};
use crate::chain::{self, Settled};
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, UnitOutcome};
use crate::pipeline::UnitSpec;
use crate::platform::{BEACON_KIND, UPGRADE_TO_SIGNATURE};
use crate::types::{Address, TxHash};

const UPGRADE_BEACON: &str = "upgradeBeacon";

/// Units for one beaconed implementation, implementation first.
///
/// The beacon is a separate unit with its own record, so a failed beacon
/// deployment leaves the confirmed implementation recorded and a rerun
/// deploys only the beacon.
pub fn install(implementation: &str, logic_kind: &str, beacon: &str) -> [UnitSpec; 2] {
    [
        UnitSpec::new(implementation, logic_kind),
        UnitSpec::new(beacon, BEACON_KIND).unit_arg(implementation),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconedImplementation {
    pub beacon_address: Address,
    pub implementation_address: Address,
    pub logic_kind: String,
}

/// Current pointer of a recorded beacon.
///
/// The last recorded upgrade wins over the implementation the beacon was
/// constructed with.
pub fn resolve(book: &AddressBook, beacon: &str) -> Result<BeaconedImplementation> {
    let record = book
        .record_for(beacon)
        .ok_or_else(|| Error::unknown_unit(beacon, Some(book.network().to_string())))?;
    if record.contract_kind != BEACON_KIND {
        return Err(not_a_beacon(beacon, &record.contract_kind));
    }

    let implementation = match book.beacon_implementation(record.address) {
        Some(addr) => addr,
        None => record
            .constructor_args
            .first()
            .and_then(Token::as_address)
            .ok_or_else(|| {
                Error::internal_unexpected(format!(
                    "Beacon record '{}' has no implementation argument",
                    beacon
                ))
            })?,
    };

    let logic_kind = book
        .records()
        .find(|r| r.address == implementation)
        .map(|r| r.contract_kind.clone())
        .ok_or_else(|| {
            Error::internal_unexpected(format!(
                "Implementation {} of beacon '{}' is not recorded",
                implementation, beacon
            ))
        })?;

    Ok(BeaconedImplementation {
        beacon_address: record.address,
        implementation_address: implementation,
        logic_kind,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    Upgraded,
    /// The beacon already pointed at the requested implementation.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconUpgrade {
    pub beacon: String,
    pub beacon_address: Address,
    pub previous_implementation: Address,
    pub implementation: UnitOutcome,
    pub status: UpgradeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
}

/// Point `beacon` at the implementation unit `implementation` of `logic_kind`.
///
/// The implementation is deployed unless already recorded. The beacon's own
/// address never changes, and its logic kind never changes either: an
/// implementation of another kind is rejected before anything is sent.
pub fn upgrade(
    orchestrator: &mut Orchestrator<'_>,
    beacon: &str,
    implementation: &str,
    logic_kind: &str,
) -> Result<BeaconUpgrade> {
    let chain = orchestrator.chain();
    let policy = orchestrator.policy();
    let mut current = resolve(orchestrator.book(), beacon)?;

    ensure_logic_kind(beacon, &current.logic_kind, logic_kind)?;
    if let Some(existing) = orchestrator.book().record_for(implementation) {
        ensure_logic_kind(beacon, &existing.contract_kind, logic_kind)?;
    }

    let key = format!("{}:{}", UPGRADE_BEACON, current.beacon_address);
    let resumed = settle_pending(orchestrator, &key, beacon)?;
    if resumed.is_some() {
        current = resolve(orchestrator.book(), beacon)?;
    }

    let outcome = orchestrator
        .provision_unit(&UnitSpec::new(implementation, logic_kind))
        .map_err(|e| e.with_step(implementation))?;
    ensure_logic_kind(beacon, &outcome.contract_kind, logic_kind)?;

    if outcome.address == current.implementation_address {
        eprintln!(
            "[upgrade] {} already points at {} ({})",
            beacon, implementation, outcome.address
        );
        return Ok(BeaconUpgrade {
            beacon: beacon.to_string(),
            beacon_address: current.beacon_address,
            previous_implementation: current.implementation_address,
            implementation: outcome,
            status: if resumed.is_some() {
                UpgradeStatus::Upgraded
            } else {
                UpgradeStatus::Unchanged
            },
            transaction_hash: resumed,
        });
    }

    let tx = chain
        .call(
            current.beacon_address,
            UPGRADE_TO_SIGNATURE,
            &[Token::Address(outcome.address)],
        )
        .map_err(|e| e.with_step(beacon))?;
    let book = orchestrator.book_mut();
    book.record_pending(
        &key,
        tx,
        PendingAction::UpgradeBeacon {
            beacon: current.beacon_address,
            implementation: outcome.address,
        },
    )?;
    chain::confirm(chain, book, &key, beacon, tx, &policy)?;
    book.record_beacon_implementation(&key, current.beacon_address, outcome.address)?;

    eprintln!(
        "[upgrade] {} now points at {} ({})",
        beacon, implementation, outcome.address
    );
    Ok(BeaconUpgrade {
        beacon: beacon.to_string(),
        beacon_address: current.beacon_address,
        previous_implementation: current.implementation_address,
        implementation: outcome,
        status: UpgradeStatus::Upgraded,
        transaction_hash: Some(tx),
    })
}

/// Settle an `upgradeTo` an earlier run left pending. Returns the transaction
/// when it confirmed.
fn settle_pending(
    orchestrator: &mut Orchestrator<'_>,
    key: &str,
    beacon: &str,
) -> Result<Option<TxHash>> {
    let Some(pending) = orchestrator.book().pending(key).cloned() else {
        return Ok(None);
    };
    let tx = pending.transaction_hash;
    let chain = orchestrator.chain();
    let policy = orchestrator.policy();
    let book = orchestrator.book_mut();

    match chain::settle(chain, beacon, tx, &policy)? {
        Settled::Confirmed => {
            match pending.action {
                PendingAction::UpgradeBeacon {
                    beacon: address,
                    implementation,
                } => book.record_beacon_implementation(key, address, implementation)?,
                _ => book.clear_pending(key)?,
            }
            eprintln!("[upgrade] {} upgrade from an earlier run confirmed (tx {})", beacon, tx);
            Ok(Some(tx))
        }
        Settled::Dropped | Settled::Reverted => {
            book.clear_pending(key)?;
            Ok(None)
        }
    }
}

fn ensure_logic_kind(beacon: &str, found: &str, requested: &str) -> Result<()> {
    if found == requested {
        return Ok(());
    }
    Err(Error::validation_invalid_argument(
        "kind",
        format!(
            "Beacon '{}' would serve {} logic, but {} was requested",
            beacon, found, requested
        ),
        Some(requested.to_string()),
        Some(vec![found.to_string()]),
    ))
}

fn not_a_beacon(unit: &str, kind: &str) -> Error {
    Error::validation_invalid_argument(
        "beacon",
        format!("Unit '{}' is a {}, not a {}", unit, kind, BEACON_KIND),
        Some(unit.to_string()),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainClient, ConfirmationPolicy, MemoryChain};
    use crate::environment::Environment;
    use crate::error::ErrorCode;
    use crate::orchestrator::UnitStatus;
    use crate::platform::PROXY_KIND;

    const IMPL: &str = "DelegationOwnerImplementation";
    const BEACON: &str = "DelegationOwnerBeacon";

    fn installed(chain: &MemoryChain, book: &mut AddressBook) {
        let env = Environment::new();
        Orchestrator::new(chain, book, &env, ConfirmationPolicy::default())
            .run(&install(IMPL, "DelegationOwner", BEACON))
            .unwrap();
    }

    #[test]
    fn beacon_points_at_installed_implementation() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);

        let pair = resolve(&book, BEACON).unwrap();
        assert_eq!(pair.implementation_address, book.get(IMPL).unwrap());
        assert_eq!(pair.logic_kind, "DelegationOwner");
        assert_eq!(
            chain.beacon_implementation(pair.beacon_address),
            Some(pair.implementation_address)
        );
    }

    #[test]
    fn upgrade_moves_proxies_without_moving_the_beacon() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);
        let before = resolve(&book, BEACON).unwrap();
        let (proxy, _) = chain
            .deploy_contract(PROXY_KIND, &[Token::Address(before.beacon_address)])
            .unwrap();

        let env = Environment::new();
        let mut orchestrator =
            Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default());
        let result = upgrade(&mut orchestrator, BEACON, "DelegationOwnerV2", "DelegationOwner")
            .unwrap();

        assert_eq!(result.status, UpgradeStatus::Upgraded);
        assert_eq!(result.beacon_address, before.beacon_address);
        assert_eq!(chain.resolve_proxy(proxy), Some(result.implementation.address));

        let after = resolve(&book, BEACON).unwrap();
        assert_eq!(after.beacon_address, before.beacon_address);
        assert_eq!(after.implementation_address, book.get("DelegationOwnerV2").unwrap());
    }

    #[test]
    fn repeated_upgrade_is_a_no_op() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);
        let env = Environment::new();

        let mut orchestrator =
            Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default());
        upgrade(&mut orchestrator, BEACON, "DelegationOwnerV2", "DelegationOwner").unwrap();
        let sent = chain.transaction_count();

        let again =
            upgrade(&mut orchestrator, BEACON, "DelegationOwnerV2", "DelegationOwner").unwrap();
        assert_eq!(again.status, UpgradeStatus::Unchanged);
        assert_eq!(again.implementation.status, UnitStatus::Skipped);
        assert_eq!(chain.transaction_count(), sent);
    }

    #[test]
    fn implementation_of_another_kind_is_rejected() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);
        let env = Environment::new();
        Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&[UnitSpec::new("DelegationGuardImplementation", "DelegationGuard")])
            .unwrap();
        let before = resolve(&book, BEACON).unwrap();
        let sent = chain.transaction_count();

        let mut orchestrator =
            Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default());
        let err = upgrade(
            &mut orchestrator,
            BEACON,
            "DelegationGuardImplementation",
            "DelegationOwner",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);

        let err = upgrade(&mut orchestrator, BEACON, "DelegationGuardV2", "DelegationGuard")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);

        assert_eq!(chain.transaction_count(), sent);
        assert_eq!(resolve(&book, BEACON).unwrap(), before);
        assert_eq!(chain.beacon_implementation(before.beacon_address), Some(before.implementation_address));
    }

    #[test]
    fn timed_out_upgrade_is_awaited_on_retry() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);
        let env = Environment::new();
        chain.stall_next_call(UPGRADE_TO_SIGNATURE);

        let mut orchestrator =
            Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default());
        let err = upgrade(&mut orchestrator, BEACON, "DelegationOwnerV2", "DelegationOwner")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainConfirmationTimeout);
        let sent = chain.transaction_count();

        chain.release_stalled();
        let result =
            upgrade(&mut orchestrator, BEACON, "DelegationOwnerV2", "DelegationOwner").unwrap();
        assert_eq!(result.status, UpgradeStatus::Upgraded);
        assert_eq!(chain.transaction_count(), sent);
        let v2 = book.get("DelegationOwnerV2").unwrap();
        assert_eq!(resolve(&book, BEACON).unwrap().implementation_address, v2);
        assert!(book.ledger().pending.is_empty());
    }

    #[test]
    fn failed_beacon_deploy_resumes_at_the_beacon() {
        let chain = MemoryChain::default();
        chain.fail_next_deploy(BEACON_KIND);
        let mut book = AddressBook::ephemeral("hardhat");
        let env = Environment::new();

        let err = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&install(IMPL, "DelegationOwner", BEACON))
            .unwrap_err();
        assert_eq!(err.details["step"], BEACON);
        let implementation = book.get(IMPL).unwrap();
        assert!(!book.record_exists(BEACON));

        let outcomes = Orchestrator::new(&chain, &mut book, &env, ConfirmationPolicy::default())
            .run(&install(IMPL, "DelegationOwner", BEACON))
            .unwrap();
        assert_eq!(outcomes[0].status, UnitStatus::Skipped);
        assert_eq!(outcomes[1].status, UnitStatus::Deployed);
        assert_eq!(book.get(IMPL).unwrap(), implementation);
        assert_eq!(chain.transaction_count(), 2);
    }

    #[test]
    fn non_beacon_unit_is_rejected() {
        let chain = MemoryChain::default();
        let mut book = AddressBook::ephemeral("hardhat");
        installed(&chain, &mut book);
        let err = resolve(&book, IMPL).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }
}
