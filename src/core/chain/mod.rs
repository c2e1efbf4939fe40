//! Chain-submission boundary.
//!
//! The pipeline talks to a ledger only through [`ChainClient`]. Two
//! implementations ship with the crate: [`rpc::RpcChain`] for real nodes and
//! [`memory::MemoryChain`], an auto-mining in-process ledger used for the
//! built-in `hardhat` network and in tests.

pub mod memory;
pub mod rpc;

use std::time::Duration;

use crate::abi::Token;
use crate::address_book::AddressBook;
use crate::error::{ErrorCode, Result};
use crate::types::{Address, TxHash};

pub use memory::MemoryChain;
pub use rpc::RpcChain;

/// How long and how deep to wait for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// What the node knows about a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Never seen, or evicted from the mempool.
    Unknown,
    Pending,
    Mined,
    Reverted,
}

/// Outcome of settling a transaction submitted by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Confirmed,
    /// Gone from the node; the action has to be submitted again.
    Dropped,
    /// Mined but failed; the action has to be submitted again.
    Reverted,
}

/// Submits transactions from a single deploying identity.
///
/// Implementations own that identity's nonce sequence: transactions are
/// submitted strictly in increasing nonce order.
pub trait ChainClient {
    /// Account every transaction is sent from.
    fn deployer(&self) -> Address;

    /// Submit a contract creation. Returns the address the contract will
    /// occupy once mined, and the creating transaction.
    fn deploy_contract(&self, kind: &str, args: &[Token]) -> Result<(Address, TxHash)>;

    /// Submit a state-changing call. `method` is a canonical signature such
    /// as `setFactory(address)`.
    fn call(&self, address: Address, method: &str, args: &[Token]) -> Result<TxHash>;

    /// Block until `tx` has `policy.confirmations` confirmations.
    ///
    /// Fails with `ConfirmationTimeout(name)` once `policy.timeout` elapses and
    /// with `TransactionReverted(name)` when the transaction was mined but failed.
    fn wait_for_confirmation(
        &self,
        name: &str,
        tx: TxHash,
        policy: &ConfirmationPolicy,
    ) -> Result<()>;

    fn transaction_state(&self, tx: TxHash) -> Result<TxState>;
}

/// Wait for a transaction an earlier run left unconfirmed.
///
/// A still-pending transaction is waited on again and is never replaced:
/// a timeout surfaces as `ConfirmationTimeout(name)`.
pub fn settle(
    chain: &dyn ChainClient,
    name: &str,
    tx: TxHash,
    policy: &ConfirmationPolicy,
) -> Result<Settled> {
    match chain.transaction_state(tx)? {
        TxState::Unknown => Ok(Settled::Dropped),
        TxState::Reverted => Ok(Settled::Reverted),
        TxState::Pending | TxState::Mined => match chain.wait_for_confirmation(name, tx, policy) {
            Ok(()) => Ok(Settled::Confirmed),
            Err(err) if err.code == ErrorCode::ChainTransactionReverted => Ok(Settled::Reverted),
            Err(err) => Err(err),
        },
    }
}

/// Wait for `tx`, which `book` tracks as pending under `key`.
///
/// A revert settles the entry. On a timeout it stays, so the next run waits
/// for the same transaction.
pub fn confirm(
    chain: &dyn ChainClient,
    book: &mut AddressBook,
    key: &str,
    name: &str,
    tx: TxHash,
    policy: &ConfirmationPolicy,
) -> Result<()> {
    match chain.wait_for_confirmation(name, tx, policy) {
        Err(err) if err.code == ErrorCode::ChainTransactionReverted => {
            book.clear_pending(key)?;
            Err(err)
        }
        other => other,
    }
}
