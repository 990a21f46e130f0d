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

//! Wire types for the Ethereum JSON-RPC methods used by the pipeline.

use alloy_primitives::{Address, B64, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Serde support for u64 quantities encoded as 0x-prefixed hex strings
pub mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let quantity = String::deserialize(deserializer)?;
        let digits = quantity
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom(format!("not a hex quantity: {quantity}")))?;
        u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
    }
}

/// Serde support for optional u64 hex quantities. Only called on Some values;
/// absent fields are skipped at the struct level.
pub mod hex_u64_opt {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::hex_u64::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Block as returned by eth_getBlockByNumber / eth_getBlockByHash with
/// transaction hashes only
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(with = "hex_u64")]
    pub number: u64,
    pub hash: B256,
    /// Proof-of-work nonce; absent on non-PoW chains
    #[serde(default)]
    pub nonce: Option<B64>,
    #[serde(default)]
    pub uncles: Vec<B256>,
    #[serde(default)]
    pub transactions: Vec<B256>,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
}

/// Receipt as returned by eth_getBlockReceipts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub gas_used: U256,
    /// Also populated on ETC-style chains
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
}

/// Total transaction fees earned by a block's miner
pub fn calculate_tx_fees(receipts: &[RpcReceipt]) -> U256 {
    receipts.iter().fold(U256::ZERO, |acc, receipt| {
        acc + receipt.gas_used * receipt.effective_gas_price.unwrap_or(U256::ZERO)
    })
}

/// Fee parameters reported by the node
#[derive(Debug, Clone, Default)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Transaction request for eth_estimateGas / eth_sendTransaction
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none", with = "hex_u64_opt")]
    pub gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none", with = "hex_u64_opt")]
    pub nonce: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", with = "hex_u64_opt")]
    pub tx_type: Option<u64>,
}

/// An uncle resolved to its own body. Uncles live at their own heights,
/// distinct from the nephew block that included them.
#[derive(Debug, Clone)]
pub struct UncleBlock {
    pub number: u64,
    pub hash: B256,
    pub nonce: Option<B64>,
}

/// A canonical block joined with its receipts and uncle bodies, the unit
/// the reconciler matches ledger entries against
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: B256,
    pub nonce: Option<B64>,
    pub uncle_count: usize,
    pub tx_count: usize,
    /// Sum of gas_used * effective_gas_price over the block's receipts
    pub tx_fees: U256,
    pub uncles: Vec<UncleBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_block() {
        let raw = serde_json::json!({
            "number": "0x64",
            "hash": "0x2f9c9a2e26bd49c7655f21b23e2b7d659e6f3a21e53bd1459b3ce5451f07909a",
            "nonce": "0x689056015818adbe",
            "uncles": ["0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"],
            "transactions": [],
            "baseFeePerGas": "0x3b9aca00",
            "miner": "0x0000000000000000000000000000000000000000"
        });

        let block: RpcBlock = serde_json::from_value(raw).unwrap();
        assert_eq!(block.number, 100);
        assert_eq!(block.uncles.len(), 1);
        assert_eq!(block.base_fee_per_gas, Some(U256::from(1_000_000_000u64)));
        assert!(block.nonce.is_some());
    }

    #[test]
    fn test_calculate_tx_fees() {
        let receipts = vec![
            RpcReceipt {
                gas_used: U256::from(21_000u64),
                effective_gas_price: Some(U256::from(2_000_000_000u64)),
            },
            RpcReceipt {
                gas_used: U256::from(50_000u64),
                effective_gas_price: Some(U256::from(1_000_000_000u64)),
            },
        ];

        assert_eq!(
            calculate_tx_fees(&receipts),
            U256::from(21_000u64 * 2_000_000_000 + 50_000 * 1_000_000_000)
        );
    }

    #[test]
    fn test_serialize_transaction_request() {
        let tx = TransactionRequest {
            to: Some(Address::ZERO),
            value: Some(U256::from(1u64)),
            nonce: Some(7),
            tx_type: Some(2),
            ..Default::default()
        };

        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["nonce"], "0x7");
        assert_eq!(value["type"], "0x2");
        assert!(value.get("gasPrice").is_none());
    }
}
