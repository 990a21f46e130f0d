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

//! On-chain collaborators for chains that expose them.
//!
//! Three contracts: a multicall aggregator batching independent read calls
//! into one round trip, a consensus view reporting the exact reward a
//! coinbase earned per block, and a batch sender paying many recipients in
//! one transaction. Addresses are resolved once at startup from a static
//! chain-id table; chains without entries run the schedule-based reward
//! path and sequential payouts.

use std::collections::HashMap;

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use ethrpc::EthRpcClient;
use tracing::debug;

use crate::error::UnlockerError;
use crate::rewards::CPUCHAIN;

sol! {
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct CallResult {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calldata calls) external payable returns (CallResult[] memory returnData);

    function getBlockRewards(uint256 blockNumber, address coinbase) external view returns (uint256 staked, address[] memory addresses, uint256[] memory rewards);

    function send(address[] calldata recipients, uint256[] calldata amounts, uint256 gasLimit) external payable;
}

/// Contract bindings for one recognized chain
#[derive(Debug, Clone, Copy)]
pub struct ChainContracts {
    pub multicall: Address,
    pub consensus_view: Address,
    pub sender: Address,
}

impl ChainContracts {
    /// Static chain-id table; None for chains without deployed bindings
    pub fn resolve(chain_id: u64) -> Option<Self> {
        match chain_id {
            CPUCHAIN => Some(Self {
                multicall: address!("cA11bde05977b3631167028862bE2a173976CA11"),
                consensus_view: address!("0000000000000000000000000000000000637075"),
                sender: address!("0000000000000000000000000000000000637075"),
            }),
            _ => None,
        }
    }

    /// Contract-reported reward per height for the pool coinbase, fetched
    /// as one multicall round trip. An empty height set costs nothing.
    pub async fn batch_block_rewards(
        &self,
        rpc: &EthRpcClient,
        heights: &[u64],
        coinbase: Address,
    ) -> Result<HashMap<u64, U256>, UnlockerError> {
        if heights.is_empty() {
            return Ok(HashMap::new());
        }

        let calls: Vec<Call3> = heights
            .iter()
            .map(|height| Call3 {
                target: self.consensus_view,
                allowFailure: false,
                callData: getBlockRewardsCall {
                    blockNumber: U256::from(*height),
                    coinbase,
                }
                .abi_encode()
                .into(),
            })
            .collect();

        let data: Bytes = aggregate3Call { calls }.abi_encode().into();
        let returned = rpc.call(self.multicall, data).await?;

        let results = aggregate3Call::abi_decode_returns(&returned)
            .map_err(|e| UnlockerError::Contract(format!("aggregate3: {e}")))?;

        if results.len() != heights.len() {
            return Err(UnlockerError::Contract(format!(
                "aggregate3 returned {} results for {} calls",
                results.len(),
                heights.len()
            )));
        }

        let mut rewards = HashMap::new();

        for (height, result) in heights.iter().zip(results) {
            if !result.success {
                return Err(UnlockerError::Contract(format!(
                    "getBlockRewards({height}) reverted"
                )));
            }

            let decoded = getBlockRewardsCall::abi_decode_returns(&result.returnData)
                .map_err(|e| UnlockerError::Contract(format!("getBlockRewards({height}): {e}")))?;

            let total = decoded
                .addresses
                .iter()
                .zip(decoded.rewards.iter())
                .filter(|(address, _)| **address == coinbase)
                .fold(U256::ZERO, |acc, (_, reward)| acc + *reward);

            rewards
                .entry(*height)
                .and_modify(|sum| *sum += total)
                .or_insert(total);
        }

        debug!("Contract rewards resolved for {} heights", heights.len());

        Ok(rewards)
    }

    /// Calldata for one batched payout through the sender contract
    pub fn encode_send(recipients: Vec<Address>, amounts: Vec<U256>, gas_limit: u64) -> Bytes {
        sendCall {
            recipients,
            amounts,
            gasLimit: U256::from(gas_limit),
        }
        .abi_encode()
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethrpc::test_utils::{mock_method, setup_mock_eth_rpc};

    fn encoded_rewards(entries: Vec<(Address, u64)>) -> Bytes {
        let (addresses, rewards): (Vec<Address>, Vec<U256>) = entries
            .into_iter()
            .map(|(address, reward)| (address, U256::from(reward)))
            .unzip();
        getBlockRewardsCall::abi_encode_returns(&getBlockRewardsReturn {
            staked: U256::ZERO,
            addresses,
            rewards,
        })
        .into()
    }

    #[tokio::test]
    async fn test_batch_block_rewards_sums_coinbase_entries() {
        let coinbase = address!("00000000000000000000000000000000000000aa");
        let other = address!("00000000000000000000000000000000000000bb");

        let results = vec![
            CallResult {
                success: true,
                returnData: encoded_rewards(vec![(coinbase, 70), (other, 20), (coinbase, 5)]),
            },
            CallResult {
                success: true,
                returnData: encoded_rewards(vec![(other, 100)]),
            },
        ];
        let encoded: Bytes = aggregate3Call::abi_encode_returns(&results).into();

        let (server, config) = setup_mock_eth_rpc().await;
        mock_method(&server, "eth_call", serde_json::json!(encoded.to_string())).await;

        let rpc = EthRpcClient::new(&config).unwrap();

        let contracts = ChainContracts::resolve(CPUCHAIN).unwrap();
        let rewards = contracts
            .batch_block_rewards(&rpc, &[100, 101], coinbase)
            .await
            .unwrap();

        assert_eq!(rewards[&100], U256::from(75u64));
        assert_eq!(rewards[&101], U256::ZERO);
    }

    #[tokio::test]
    async fn test_empty_height_set_skips_the_round_trip() {
        let (_, config) = setup_mock_eth_rpc().await;
        let rpc = EthRpcClient::new(&config).unwrap();

        let contracts = ChainContracts::resolve(CPUCHAIN).unwrap();
        let rewards = contracts
            .batch_block_rewards(&rpc, &[], Address::ZERO)
            .await
            .unwrap();
        assert!(rewards.is_empty());
    }

    #[test]
    fn test_encode_send_round_trips() {
        let recipients = vec![Address::ZERO];
        let amounts = vec![U256::from(42u64)];
        let data = ChainContracts::encode_send(recipients.clone(), amounts.clone(), 42_000);

        let decoded = sendCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.recipients, recipients);
        assert_eq!(decoded.amounts, amounts);
        assert_eq!(decoded.gasLimit, U256::from(42_000u64));
    }

    #[test]
    fn test_unknown_chain_has_no_contracts() {
        assert!(ChainContracts::resolve(1).is_none());
        assert!(ChainContracts::resolve(424242).is_none());
    }
}
