// Copyright (C) 2025, 2026 Unlockerd Developers (see AUTHORS)
//
// This file is part of Unlockerd
//
// Unlockerd is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Unlockerd is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Unlockerd. If not, see <https://www.gnu.org/licenses/>.

//! Fixtures and fakes shared across the crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::{Address, B256, U256};
use ethrpc::{ChainBlock, EthRpcError, TransactionRequest};

use crate::block::BlockData;
use crate::payout::PaymentRpc;
use crate::reconcile::ChainView;
use crate::store::ops::StoreOp;

const GWEI: u64 = 1_000_000_000;

/// Whole ether in wei
pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(GWEI) * U256::from(GWEI)
}

/// A freshly-found round entry with no shares loaded yet
pub fn candidate(height: u64, nonce: &str) -> BlockData {
    let member = format!("{nonce}:0xpowhash:0xmixdigest:1700000000:1000:0");
    BlockData::parse_candidate(height, &member).unwrap()
}

/// A canonical block carrying the given sealing nonce and no uncles
pub fn chain_block(number: u64, hash: B256, nonce: &str) -> ChainBlock {
    ChainBlock {
        number,
        hash,
        nonce: nonce.parse().ok(),
        uncle_count: 0,
        tx_count: 0,
        tx_fees: U256::ZERO,
        uncles: Vec::new(),
    }
}

/// A chain view over the given fetched heights, with no failures and no
/// contract rewards
pub fn view_with(latest: u64, blocks: Vec<(u64, Option<ChainBlock>)>) -> ChainView {
    ChainView {
        latest,
        blocks: blocks.into_iter().collect(),
        ..ChainView::default()
    }
}

#[derive(Default)]
struct PaymentRpcState {
    gas_estimate: Option<u64>,
    fail_all: bool,
    fail_to: Option<Address>,
    sent: Vec<TransactionRequest>,
}

/// Scripted stand-in for the signing RPC surface. Estimates succeed with
/// a plain-transfer cost unless overridden; sends can be failed globally
/// or for a single recipient.
#[derive(Default)]
pub struct PaymentRpcFake {
    state: Mutex<PaymentRpcState>,
}

impl PaymentRpcFake {
    pub fn set_gas_estimate(&self, gas: u64) {
        self.state.lock().unwrap().gas_estimate = Some(gas);
    }

    pub fn fail_all_sends(&self) {
        self.state.lock().unwrap().fail_all = true;
    }

    pub fn fail_sends_to(&self, address: &str) {
        self.state.lock().unwrap().fail_to = Some(address.parse().unwrap());
    }

    /// Nonces of the transactions that went through, in send order
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|tx| tx.nonce.unwrap_or(0))
            .collect()
    }
}

impl PaymentRpc for PaymentRpcFake {
    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, EthRpcError> {
        Ok(self.state.lock().unwrap().gas_estimate.unwrap_or(21_000))
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, EthRpcError> {
        let mut state = self.state.lock().unwrap();

        let refused = state.fail_all || (state.fail_to.is_some() && tx.to == state.fail_to);
        if refused {
            return Err(EthRpcError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
            });
        }

        let hash = B256::from(U256::from(tx.nonce.unwrap_or(0) + 1));
        state.sent.push(tx.clone());
        Ok(hash)
    }
}

/// In-memory stand-in for the backing store, good enough to replay a
/// write plan and inspect the result
#[derive(Debug, Default)]
pub struct MemStore {
    pub zsets: HashMap<String, HashMap<String, u64>>,
    pub hashes: HashMap<String, HashMap<String, String>>,
}

impl MemStore {
    pub fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::ZAdd { key, score, member } => {
                self.zsets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score);
            }
            StoreOp::ZRem { key, member } => {
                if let Some(set) = self.zsets.get_mut(key) {
                    set.remove(member);
                }
            }
            StoreOp::ZRemRangeBelow { key, bound } => {
                if let Some(set) = self.zsets.get_mut(key) {
                    set.retain(|_, score| *score >= *bound);
                }
            }
            StoreOp::Del { key } => {
                self.zsets.remove(key);
                self.hashes.remove(key);
            }
            StoreOp::Rename { from, to } => {
                if let Some(set) = self.zsets.remove(from) {
                    self.zsets.insert(to.clone(), set);
                }
                if let Some(hash) = self.hashes.remove(from) {
                    self.hashes.insert(to.clone(), hash);
                }
            }
            StoreOp::HSet { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            StoreOp::HSetNx { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_insert_with(|| value.clone());
            }
            StoreOp::HIncrBy { key, field, delta } => {
                let slot = self
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_insert_with(|| "0".to_string());
                let current: i64 = slot.parse().unwrap_or(0);
                *slot = (current + delta).to_string();
            }
        }
    }

    pub fn apply_all(&mut self, ops: &[StoreOp]) {
        for op in ops {
            self.apply(op);
        }
    }

    pub fn zset(&self, key: &str) -> Vec<(String, u64)> {
        let mut members: Vec<(String, u64)> = self
            .zsets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    pub fn hash_field(&self, key: &str, field: &str) -> Option<&str> {
        self.hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .map(String::as_str)
    }
}
