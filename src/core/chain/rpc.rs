//! JSON-RPC chain client.
//!
//! Sends `eth_sendTransaction` from a node-managed account (Hardhat, Anvil or
//! a node with an unlocked signer). The client assigns nonces itself so the
//! contract address of a creation is known at submission time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use alloy_primitives::hex;
use reqwest::blocking::Client;
use serde_json::{json, Value};

use super::{ChainClient, ConfirmationPolicy, TxState};
use crate::abi::{self, Token};
use crate::artifacts::ArtifactStore;
use crate::error::{Error, Result};
use crate::types::{self, Address, TxHash};

pub struct RpcChain {
    client: Client,
    url: String,
    deployer: Address,
    next_nonce: Mutex<u64>,
    request_id: AtomicU64,
    artifacts: ArtifactStore,
    gas_limit: Option<u64>,
}

impl RpcChain {
    /// Connect and pin the deploying account and its pending nonce.
    pub fn connect(
        url: impl Into<String>,
        deployer: Option<Address>,
        artifacts: ArtifactStore,
        gas_limit: Option<u64>,
    ) -> Result<Self> {
        let mut chain = Self {
            client: Client::new(),
            url: url.into(),
            deployer: Address::ZERO,
            next_nonce: Mutex::new(0),
            request_id: AtomicU64::new(1),
            artifacts,
            gas_limit,
        };

        chain.deployer = match deployer {
            Some(addr) => addr,
            None => chain.first_account()?,
        };

        let nonce = chain.request(
            "eth_getTransactionCount",
            json!([chain.deployer.to_string(), "pending"]),
        )?;
        let nonce = parse_quantity("eth_getTransactionCount", &nonce)?;
        chain.next_nonce = Mutex::new(nonce);

        crate::log_status!(
            "chain",
            "Connected to {} as {} (nonce {})",
            chain.url,
            chain.deployer,
            nonce
        );
        Ok(chain)
    }

    fn first_account(&self) -> Result<Address> {
        let accounts = self.request("eth_accounts", json!([]))?;
        let first = accounts
            .as_array()
            .and_then(|list| list.first())
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::missing_configuration("deployer", None)
                    .with_hint("The node exposes no accounts; set 'deployer' for this network")
            })?;
        types::parse_address("eth_accounts", first)
    }

    fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| Error::rpc_failed(method, e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|e| Error::rpc_failed(method, format!("HTTP {}: {}", status, e)))?;

        if let Some(err) = payload.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::rpc_failed(method, message));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a transaction with the next nonce; the nonce only advances once
    /// the node has accepted the transaction.
    fn send(&self, to: Option<Address>, data: Vec<u8>) -> Result<(u64, TxHash)> {
        let mut next_nonce = self
            .next_nonce
            .lock()
            .map_err(|_| Error::internal_unexpected("nonce lock poisoned"))?;
        let nonce = *next_nonce;

        let mut tx = json!({
            "from": self.deployer.to_string(),
            "data": format!("0x{}", hex::encode(&data)),
            "nonce": format!("0x{:x}", nonce),
        });
        if let Some(to) = to {
            tx["to"] = json!(to.to_string());
        }
        if let Some(gas) = self.gas_limit {
            tx["gas"] = json!(format!("0x{:x}", gas));
        }

        let result = self.request("eth_sendTransaction", json!([tx]))?;
        let hash = result
            .as_str()
            .ok_or_else(|| Error::rpc_failed("eth_sendTransaction", "missing transaction hash"))
            .and_then(|raw| types::parse_tx_hash("eth_sendTransaction", raw))?;

        *next_nonce = nonce + 1;
        Ok((nonce, hash))
    }

    fn block_number(&self) -> Result<u64> {
        let head = self.request("eth_blockNumber", json!([]))?;
        parse_quantity("eth_blockNumber", &head)
    }
}

impl ChainClient for RpcChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    fn deploy_contract(&self, kind: &str, args: &[Token]) -> Result<(Address, TxHash)> {
        let mut data = self.artifacts.bytecode(kind)?;
        data.extend(abi::encode(args));
        let (nonce, hash) = self.send(None, data)?;
        Ok((self.deployer.create(nonce), hash))
    }

    fn call(&self, address: Address, method: &str, args: &[Token]) -> Result<TxHash> {
        let (_, hash) = self.send(Some(address), abi::encode_call(method, args))?;
        Ok(hash)
    }

    fn wait_for_confirmation(
        &self,
        name: &str,
        tx: TxHash,
        policy: &ConfirmationPolicy,
    ) -> Result<()> {
        let started = Instant::now();

        loop {
            let receipt = self.request("eth_getTransactionReceipt", json!([tx.to_string()]))?;

            if !receipt.is_null() {
                if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
                    return Err(Error::transaction_reverted(
                        name,
                        Some(tx.to_string()),
                        "receipt status 0",
                    ));
                }

                let mined_in = receipt
                    .get("blockNumber")
                    .ok_or_else(|| Error::rpc_failed("eth_getTransactionReceipt", "missing blockNumber"))
                    .and_then(|v| parse_quantity("eth_getTransactionReceipt", v))?;
                let head = self.block_number()?;

                if head + 1 >= mined_in + policy.confirmations {
                    return Ok(());
                }
            }

            if started.elapsed() >= policy.timeout {
                return Err(Error::confirmation_timeout(
                    name,
                    tx.to_string(),
                    policy.confirmations,
                    policy.timeout.as_secs(),
                ));
            }

            std::thread::sleep(policy.poll_interval);
        }
    }

    fn transaction_state(&self, tx: TxHash) -> Result<TxState> {
        let receipt = self.request("eth_getTransactionReceipt", json!([tx.to_string()]))?;
        if !receipt.is_null() {
            return Ok(match receipt.get("status").and_then(Value::as_str) {
                Some("0x0") => TxState::Reverted,
                _ => TxState::Mined,
            });
        }

        let known = self.request("eth_getTransactionByHash", json!([tx.to_string()]))?;
        Ok(if known.is_null() {
            TxState::Unknown
        } else {
            TxState::Pending
        })
    }
}

fn parse_quantity(method: &str, value: &Value) -> Result<u64> {
    let raw = value
        .as_str()
        .ok_or_else(|| Error::rpc_failed(method, format!("expected hex quantity, got {}", value)))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| Error::rpc_failed(method, format!("invalid quantity '{}': {}", raw, e)))
}
