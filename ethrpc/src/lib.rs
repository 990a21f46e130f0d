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

//! Ethereum JSON-RPC client used by the unlocker pipeline.
//!
//! Thin reqwest-based JSON-RPC 2.0 transport plus typed wrappers for the
//! handful of methods the pipeline needs: block/receipt/uncle lookups, fee
//! data, signer balance and nonce, gas estimation and transaction submission
//! through the node-managed coinbase account.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub mod types;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use types::{ChainBlock, FeeData, RpcBlock, RpcReceipt, TransactionRequest, UncleBlock};

/// JSON-RPC 2.0 request structure
#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC 2.0 response structure
#[derive(Deserialize, Debug)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EthRpcConfig {
    /// HTTP endpoint of the node, e.g. http://127.0.0.1:8545
    pub url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Error type for the EthRpcClient
#[derive(Debug, thiserror::Error)]
pub enum EthRpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP error {status_code}")]
    Http { status_code: u16 },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    client: reqwest::Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl EthRpcClient {
    pub fn new(config: &EthRpcConfig) -> Result<Self, EthRpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            request_id: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, EthRpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        };

        debug!("RPC request {id}: {method}");

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            error!("RPC {method} failed with HTTP {}", response.status());
            return Err(EthRpcError::Http {
                status_code: response.status().as_u16(),
            });
        }

        let response: JsonRpcResponse = response.json().await?;

        if let Some(err) = response.error {
            return Err(EthRpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| EthRpcError::Parse(format!("{method}: {e}")))
    }

    /// Current chain head height
    pub async fn block_number(&self) -> Result<u64, EthRpcError> {
        let number: String = self.request("eth_blockNumber", vec![]).await?;
        parse_quantity(&number)
    }

    pub async fn chain_id(&self) -> Result<u64, EthRpcError> {
        let id: String = self.request("eth_chainId", vec![]).await?;
        parse_quantity(&id)
    }

    /// Address of the node-managed signer account
    pub async fn coinbase(&self) -> Result<Address, EthRpcError> {
        self.request("eth_coinbase", vec![]).await
    }

    pub async fn get_block_by_number(&self, height: u64) -> Result<Option<RpcBlock>, EthRpcError> {
        self.request(
            "eth_getBlockByNumber",
            vec![tag(height), serde_json::Value::Bool(false)],
        )
        .await
    }

    pub async fn get_block_by_hash(&self, hash: B256) -> Result<Option<RpcBlock>, EthRpcError> {
        self.request(
            "eth_getBlockByHash",
            vec![
                serde_json::Value::String(hash.to_string()),
                serde_json::Value::Bool(false),
            ],
        )
        .await
    }

    pub async fn get_block_receipts(&self, height: u64) -> Result<Vec<RpcReceipt>, EthRpcError> {
        let receipts: Option<Vec<RpcReceipt>> =
            self.request("eth_getBlockReceipts", vec![tag(height)]).await?;
        Ok(receipts.unwrap_or_default())
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, EthRpcError> {
        self.request(
            "eth_getBalance",
            vec![
                serde_json::Value::String(address.to_string()),
                serde_json::Value::String("latest".to_string()),
            ],
        )
        .await
    }

    /// Next nonce of the account including pending transactions
    pub async fn get_transaction_count(&self, address: Address) -> Result<u64, EthRpcError> {
        let count: String = self
            .request(
                "eth_getTransactionCount",
                vec![
                    serde_json::Value::String(address.to_string()),
                    serde_json::Value::String("pending".to_string()),
                ],
            )
            .await?;
        parse_quantity(&count)
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, EthRpcError> {
        let gas: String = self
            .request(
                "eth_estimateGas",
                vec![serde_json::to_value(tx).map_err(|e| EthRpcError::Parse(e.to_string()))?],
            )
            .await?;
        parse_quantity(&gas)
    }

    /// Submits a transaction signed by the node-managed account
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, EthRpcError> {
        self.request(
            "eth_sendTransaction",
            vec![serde_json::to_value(tx).map_err(|e| EthRpcError::Parse(e.to_string()))?],
        )
        .await
    }

    /// Read-only contract call against the latest state
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EthRpcError> {
        self.request(
            "eth_call",
            vec![
                serde_json::json!({ "to": to.to_string(), "data": data.to_string() }),
                serde_json::Value::String("latest".to_string()),
            ],
        )
        .await
    }

    /// Fee parameters for outgoing payments.
    ///
    /// Detects fee-market support from the latest block's base fee. Nodes
    /// without eth_maxPriorityFeePerGas fall back to a fixed 1 gwei tip.
    pub async fn get_fee_data(&self) -> Result<FeeData, EthRpcError> {
        let latest: Option<RpcBlock> = self
            .request(
                "eth_getBlockByNumber",
                vec![
                    serde_json::Value::String("latest".to_string()),
                    serde_json::Value::Bool(false),
                ],
            )
            .await?;
        let gas_price: String = self.request("eth_gasPrice", vec![]).await?;
        let gas_price = U256::from_str_radix(quantity_digits(&gas_price)?, 16)
            .map_err(|e| EthRpcError::Parse(e.to_string()))?;

        let base_fee = latest.and_then(|b| b.base_fee_per_gas);

        match base_fee {
            Some(base_fee) => {
                let priority: Result<String, EthRpcError> =
                    self.request("eth_maxPriorityFeePerGas", vec![]).await;
                let max_priority = match priority {
                    Ok(tip) => U256::from_str_radix(quantity_digits(&tip)?, 16)
                        .map_err(|e| EthRpcError::Parse(e.to_string()))?,
                    Err(_) => U256::from(1_000_000_000u64),
                };
                Ok(FeeData {
                    gas_price: Some(gas_price),
                    max_fee_per_gas: Some(base_fee * U256::from(2) + max_priority),
                    max_priority_fee_per_gas: Some(max_priority),
                })
            }
            None => Ok(FeeData {
                gas_price: Some(gas_price),
                max_fee_per_gas: None,
                max_priority_fee_per_gas: None,
            }),
        }
    }

    /// Fetches a block together with its receipts and uncle bodies.
    ///
    /// The block and its receipts are requested jointly; uncle bodies are
    /// then resolved by hash since uncles live at their own heights. Returns
    /// None when the node has no block at the height.
    pub async fn fetch_block(&self, height: u64) -> Result<Option<ChainBlock>, EthRpcError> {
        let (block, receipts) = tokio::join!(
            self.get_block_by_number(height),
            self.get_block_receipts(height)
        );

        let block = match block? {
            Some(block) => block,
            None => return Ok(None),
        };

        let receipts = receipts?;

        let uncles = futures::future::join_all(
            block.uncles.iter().map(|hash| self.get_block_by_hash(*hash)),
        )
        .await;

        let mut uncle_blocks = Vec::new();
        for uncle in uncles {
            if let Some(uncle) = uncle? {
                uncle_blocks.push(UncleBlock {
                    number: uncle.number,
                    hash: uncle.hash,
                    nonce: uncle.nonce,
                });
            }
        }

        let tx_fees = types::calculate_tx_fees(&receipts);

        Ok(Some(ChainBlock {
            number: block.number,
            hash: block.hash,
            nonce: block.nonce,
            uncle_count: block.uncles.len(),
            tx_count: block.transactions.len(),
            tx_fees,
            uncles: uncle_blocks,
        }))
    }
}

fn tag(height: u64) -> serde_json::Value {
    serde_json::Value::String(format!("{height:#x}"))
}

fn quantity_digits(quantity: &str) -> Result<&str, EthRpcError> {
    quantity
        .strip_prefix("0x")
        .ok_or_else(|| EthRpcError::Parse(format!("quantity without 0x prefix: {quantity}")))
}

fn parse_quantity(quantity: &str) -> Result<u64, EthRpcError> {
    u64::from_str_radix(quantity_digits(quantity)?, 16)
        .map_err(|e| EthRpcError::Parse(format!("{quantity}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_method, setup_mock_eth_rpc};

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x64").unwrap(), 100);
        assert!(parse_quantity("100").is_err());
    }

    #[tokio::test]
    async fn test_block_number() {
        let (server, config) = setup_mock_eth_rpc().await;
        mock_method(&server, "eth_blockNumber", serde_json::json!("0x1b4")).await;

        let client = EthRpcClient::new(&config).unwrap();
        assert_eq!(client.block_number().await.unwrap(), 436);
    }

    #[tokio::test]
    async fn test_get_block_by_number_missing() {
        let (server, config) = setup_mock_eth_rpc().await;
        mock_method(&server, "eth_getBlockByNumber", serde_json::Value::Null).await;

        let client = EthRpcClient::new(&config).unwrap();
        assert!(client.get_block_by_number(100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let (server, config) = setup_mock_eth_rpc().await;
        crate::test_utils::mock_error(&server, "eth_blockNumber", -32000, "head missing").await;

        let client = EthRpcClient::new(&config).unwrap();
        match client.block_number().await {
            Err(EthRpcError::Rpc { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "head missing");
            }
            other => panic!("expected RPC error, got {other:?}"),
        }
    }
}
