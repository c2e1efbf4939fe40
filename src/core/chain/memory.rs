//! In-process auto-mining ledger.
//!
//! Every submitted transaction is mined into its own block immediately
//! unless the sender has an unmined transaction: nonces are mined strictly in
//! order, so everything queued behind a stalled transaction stays pending
//! until that one is released or dropped.
//!
//! The few contracts whose behavior the pipeline depends on are modelled so
//! that provisioning results can be inspected: upgrade beacons, beacon
//! proxies, the wallet registry's factory binding and the capability
//! registry. Every other contract kind is recorded with its constructor
//! arguments only.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::keccak256;

use super::{ChainClient, ConfirmationPolicy, TxState};
use crate::abi::Token;
use crate::capability::{self, GrantKey};
use crate::error::{Error, Result};
use crate::platform;
use crate::types::{Address, Selector, TxHash};

/// Default deploying account, the first Hardhat development account.
pub const DEFAULT_DEPLOYER: Address = Address::new([
    0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79,
    0xcf, 0xff, 0xb9, 0x22, 0x66,
]);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fault {
    /// Next deployment of this kind is rejected at submission.
    FailDeploy(String),
    /// Next deployment of this kind is accepted but not mined.
    StallDeploy(String),
    /// Next call of this method is accepted but not mined.
    StallCall(String),
}

#[derive(Debug, Clone)]
enum Model {
    Beacon { implementation: Address },
    Proxy { beacon: Address },
    WalletRegistry { factory: Option<Address> },
    CapabilityRegistry { grants: BTreeMap<GrantKey, String> },
    Plain,
}

#[derive(Debug, Clone)]
pub struct DeployedContract {
    pub kind: String,
    pub args: Vec<Token>,
    pub owner: Address,
    model: Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Create { kind: String, args: Vec<Token> },
    Call { to: Address, method: String, args: Vec<Token> },
}

/// A submitted transaction as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub block: Option<u64>,
    /// Mined, but execution failed.
    pub reverted: bool,
    pub description: String,
    operation: Operation,
}

#[derive(Debug, Default)]
struct Ledger {
    head: u64,
    sequence: u64,
    nonces: HashMap<Address, u64>,
    contracts: BTreeMap<Address, DeployedContract>,
    transactions: Vec<SubmittedTx>,
    faults: Vec<Fault>,
}

impl Ledger {
    fn take_fault(&mut self, matches: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let idx = self.faults.iter().position(matches)?;
        Some(self.faults.remove(idx))
    }

    fn is_contract(&self, addr: Address) -> bool {
        self.contracts.contains_key(&addr)
    }

    fn next_nonce(&self, from: Address) -> u64 {
        self.nonces.get(&from).copied().unwrap_or(0)
    }

    fn has_unmined(&self, from: Address) -> bool {
        self.transactions
            .iter()
            .any(|t| t.from == from && t.block.is_none())
    }

    /// Apply an operation's effects. Nothing changes when it reverts.
    fn execute(&mut self, from: Address, nonce: u64, operation: &Operation) -> Result<()> {
        match operation {
            Operation::Create { kind, args } => {
                let model = self.build_model(kind, args)?;
                self.contracts.insert(
                    from.create(nonce),
                    DeployedContract {
                        kind: kind.clone(),
                        args: args.clone(),
                        owner: from,
                        model,
                    },
                );
                Ok(())
            }
            Operation::Call { to, method, args } => {
                let next = self.apply_call(from, *to, method, args)?;
                if let Some(entry) = self.contracts.get_mut(to) {
                    entry.model = next;
                }
                Ok(())
            }
        }
    }

    fn build_model(&self, kind: &str, args: &[Token]) -> Result<Model> {
        let first_address = || args.first().and_then(Token::as_address);

        match kind {
            platform::BEACON_KIND => {
                let implementation = first_address()
                    .filter(|addr| self.is_contract(*addr))
                    .ok_or_else(|| {
                        Error::transaction_reverted(
                            kind,
                            None,
                            "UpgradeableBeacon: implementation is not a contract",
                        )
                    })?;
                Ok(Model::Beacon { implementation })
            }
            platform::PROXY_KIND => {
                let beacon = first_address()
                    .filter(|addr| {
                        matches!(
                            self.contracts.get(addr).map(|c| &c.model),
                            Some(Model::Beacon { .. })
                        )
                    })
                    .ok_or_else(|| {
                        Error::transaction_reverted(kind, None, "ERC1967: new beacon is not a contract")
                    })?;
                Ok(Model::Proxy { beacon })
            }
            platform::WALLET_REGISTRY_KIND => Ok(Model::WalletRegistry { factory: None }),
            platform::CAPABILITY_REGISTRY_KIND => Ok(Model::CapabilityRegistry {
                grants: BTreeMap::new(),
            }),
            _ => Ok(Model::Plain),
        }
    }

    fn apply_call(&self, from: Address, address: Address, method: &str, args: &[Token]) -> Result<Model> {
        let revert = |reason: &str| Error::transaction_reverted(method, None, reason);

        let contract = self
            .contracts
            .get(&address)
            .ok_or_else(|| revert("call to non-contract address"))?;

        match (&contract.model, method) {
            (Model::Beacon { .. }, platform::UPGRADE_TO_SIGNATURE) => {
                if from != contract.owner {
                    return Err(revert("Ownable: caller is not the owner"));
                }
                let implementation = args
                    .first()
                    .and_then(Token::as_address)
                    .filter(|addr| self.is_contract(*addr))
                    .ok_or_else(|| revert("UpgradeableBeacon: implementation is not a contract"))?;
                Ok(Model::Beacon { implementation })
            }
            (Model::WalletRegistry { .. }, platform::SET_FACTORY_SIGNATURE) => {
                if from != contract.owner {
                    return Err(revert("Ownable: caller is not the owner"));
                }
                let factory = args
                    .first()
                    .and_then(Token::as_address)
                    .ok_or_else(|| revert("invalid factory argument"))?;
                Ok(Model::WalletRegistry {
                    factory: Some(factory),
                })
            }
            (Model::CapabilityRegistry { grants }, capability::ADD_SIGNATURE) => {
                if from != contract.owner {
                    return Err(revert("Ownable: caller is not the owner"));
                }
                let incoming = capability::parse_add_call(method, args)?;
                let mut grants = grants.clone();
                for grant in incoming {
                    match grants.get(&grant.key()) {
                        Some(existing) if *existing == grant.label => {}
                        Some(existing) => return Err(grant.conflict(existing)),
                        None => {
                            grants.insert(grant.key(), grant.label.clone());
                        }
                    }
                }
                Ok(Model::CapabilityRegistry { grants })
            }
            _ => Err(revert(&format!("{} has no method {}", contract.kind, method))),
        }
    }

    /// Submit from `from` with its next nonce.
    ///
    /// A sender with nothing pending gets the operation executed and mined at
    /// once, and a reverting operation is rejected without using a nonce.
    /// Otherwise the transaction waits behind the sender's pending ones.
    fn submit(
        &mut self,
        from: Address,
        operation: Operation,
        description: String,
        stall: bool,
    ) -> Result<(u64, TxHash)> {
        let nonce = self.next_nonce(from);
        let mine_now = !stall && !self.has_unmined(from);
        if mine_now {
            self.execute(from, nonce, &operation)?;
        }

        self.sequence += 1;
        let mut preimage = from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&self.sequence.to_be_bytes());
        let hash = keccak256(&preimage);

        let block = if mine_now {
            self.head += 1;
            Some(self.head)
        } else {
            None
        };

        self.nonces.insert(from, nonce + 1);
        self.transactions.push(SubmittedTx {
            hash,
            from,
            nonce,
            block,
            reverted: false,
            description,
            operation,
        });
        Ok((nonce, hash))
    }
}

pub struct MemoryChain {
    deployer: Address,
    ledger: Mutex<Ledger>,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new(DEFAULT_DEPLOYER)
    }
}

impl MemoryChain {
    pub fn new(deployer: Address) -> Self {
        Self {
            deployer,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| Error::internal_unexpected("in-memory ledger lock poisoned"))
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Reject the next deployment of `kind`.
    pub fn fail_next_deploy(&self, kind: &str) {
        if let Ok(mut ledger) = self.ledger() {
            ledger.faults.push(Fault::FailDeploy(kind.to_string()));
        }
    }

    /// Accept the next deployment of `kind` but leave it unmined.
    pub fn stall_next_deploy(&self, kind: &str) {
        if let Ok(mut ledger) = self.ledger() {
            ledger.faults.push(Fault::StallDeploy(kind.to_string()));
        }
    }

    /// Accept the next call of `method` but leave it unmined.
    pub fn stall_next_call(&self, method: &str) {
        if let Ok(mut ledger) = self.ledger() {
            ledger.faults.push(Fault::StallCall(method.to_string()));
        }
    }

    /// Mine every pending transaction in nonce order. A transaction whose
    /// execution fails is mined as reverted.
    pub fn release_stalled(&self) {
        let Ok(mut ledger) = self.ledger() else {
            return;
        };
        let mut pending: Vec<usize> = (0..ledger.transactions.len())
            .filter(|idx| ledger.transactions[*idx].block.is_none())
            .collect();
        pending.sort_by_key(|idx| ledger.transactions[*idx].nonce);

        for idx in pending {
            let tx = ledger.transactions[idx].clone();
            let reverted = ledger.execute(tx.from, tx.nonce, &tx.operation).is_err();
            ledger.head += 1;
            let block = ledger.head;
            let entry = &mut ledger.transactions[idx];
            entry.block = Some(block);
            entry.reverted = reverted;
        }
    }

    /// Evict every pending transaction, as a node dropping them from its
    /// mempool. Their nonces become free again.
    pub fn drop_stalled(&self) {
        let Ok(mut ledger) = self.ledger() else {
            return;
        };
        let mut lowest: HashMap<Address, u64> = HashMap::new();
        for tx in ledger.transactions.iter().filter(|t| t.block.is_none()) {
            let entry = lowest.entry(tx.from).or_insert(tx.nonce);
            *entry = (*entry).min(tx.nonce);
        }
        ledger.transactions.retain(|t| t.block.is_some());
        for (from, nonce) in lowest {
            ledger.nonces.insert(from, nonce);
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of transactions submitted so far, mined or not.
    pub fn transaction_count(&self) -> usize {
        self.ledger().map(|l| l.transactions.len()).unwrap_or(0)
    }

    pub fn transactions(&self) -> Vec<SubmittedTx> {
        self.ledger()
            .map(|l| l.transactions.clone())
            .unwrap_or_default()
    }

    pub fn contract(&self, address: Address) -> Option<DeployedContract> {
        self.ledger().ok()?.contracts.get(&address).cloned()
    }

    /// Implementation a beacon currently points at.
    pub fn beacon_implementation(&self, beacon: Address) -> Option<Address> {
        match self.contract(beacon)?.model {
            Model::Beacon { implementation } => Some(implementation),
            _ => None,
        }
    }

    /// Implementation a beacon proxy delegates to, resolved through its beacon.
    pub fn resolve_proxy(&self, proxy: Address) -> Option<Address> {
        match self.contract(proxy)?.model {
            Model::Proxy { beacon } => self.beacon_implementation(beacon),
            _ => None,
        }
    }

    /// Factory the wallet registry currently trusts.
    pub fn wallet_factory(&self, registry: Address) -> Option<Address> {
        match self.contract(registry)?.model {
            Model::WalletRegistry { factory } => factory,
            _ => None,
        }
    }

    /// Label of a granted capability, or `None` when not granted.
    pub fn capability(
        &self,
        registry: Address,
        asset: Address,
        target: Address,
        selector: Selector,
    ) -> Option<String> {
        match self.contract(registry)?.model {
            Model::CapabilityRegistry { grants } => grants
                .get(&GrantKey {
                    asset,
                    target,
                    selector,
                })
                .cloned(),
            _ => None,
        }
    }

    pub fn grant_count(&self, registry: Address) -> usize {
        match self.contract(registry).map(|c| c.model) {
            Some(Model::CapabilityRegistry { grants }) => grants.len(),
            _ => 0,
        }
    }

    /// Submit a call from `from`.
    pub fn call_from(
        &self,
        from: Address,
        address: Address,
        method: &str,
        args: &[Token],
    ) -> Result<TxHash> {
        let mut ledger = self.ledger()?;
        let stall = ledger
            .take_fault(|f| matches!(f, Fault::StallCall(m) if m == method))
            .is_some();
        let operation = Operation::Call {
            to: address,
            method: method.to_string(),
            args: args.to_vec(),
        };
        let (_, hash) = ledger.submit(from, operation, format!("{} {}", address, method), stall)?;
        Ok(hash)
    }
}

impl ChainClient for MemoryChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    fn deploy_contract(&self, kind: &str, args: &[Token]) -> Result<(Address, TxHash)> {
        let mut ledger = self.ledger()?;

        let stall = match ledger.take_fault(|f| {
            matches!(f, Fault::FailDeploy(k) | Fault::StallDeploy(k) if k == kind)
        }) {
            Some(Fault::FailDeploy(_)) => {
                return Err(Error::transaction_reverted(
                    kind,
                    None,
                    "simulated deployment failure",
                ))
            }
            Some(_) => true,
            None => false,
        };

        let operation = Operation::Create {
            kind: kind.to_string(),
            args: args.to_vec(),
        };
        let (nonce, hash) =
            ledger.submit(self.deployer, operation, format!("create {}", kind), stall)?;
        Ok((self.deployer.create(nonce), hash))
    }

    fn call(&self, address: Address, method: &str, args: &[Token]) -> Result<TxHash> {
        self.call_from(self.deployer, address, method, args)
    }

    fn wait_for_confirmation(
        &self,
        name: &str,
        tx: TxHash,
        policy: &ConfirmationPolicy,
    ) -> Result<()> {
        let mut ledger = self.ledger()?;
        let mined = ledger
            .transactions
            .iter()
            .find(|t| t.hash == tx)
            .and_then(|t| t.block.map(|block| (block, t.reverted)));

        match mined {
            Some((_, true)) => Err(Error::transaction_reverted(
                name,
                Some(tx.to_string()),
                "receipt status 0",
            )),
            Some((block, false)) => {
                // auto-mine empty blocks until the depth is reached
                let required_head = block + policy.confirmations.max(1) - 1;
                ledger.head = ledger.head.max(required_head);
                Ok(())
            }
            None => Err(Error::confirmation_timeout(
                name,
                tx.to_string(),
                policy.confirmations,
                policy.timeout.as_secs(),
            )),
        }
    }

    fn transaction_state(&self, tx: TxHash) -> Result<TxState> {
        let ledger = self.ledger()?;
        Ok(match ledger.transactions.iter().find(|t| t.hash == tx) {
            None => TxState::Unknown,
            Some(t) if t.block.is_none() => TxState::Pending,
            Some(t) if t.reverted => TxState::Reverted,
            Some(_) => TxState::Mined,
        })
    }
}
