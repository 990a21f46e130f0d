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

//! Reward folding, fee accounting and payment dispatch.
//!
//! Folds reconciled block rewards into per-miner ledgers, deducts pool and
//! transaction fees, checks signer solvency and dispatches payouts either
//! through the batch sender contract or as one transfer per recipient.
//! Every failure path credits the affected pending amount back to balance;
//! money is never dropped on the floor.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use ethrpc::{EthRpcClient, EthRpcError, TransactionRequest};
use tracing::{debug, error, warn};

use crate::block::BlockData;
use crate::contracts::ChainContracts;
use crate::error::UnlockerError;
use crate::units::{format_ether, format_gwei};

/// Gas allowed per payment transfer, for sending and fee accounting alike
pub const GAS_LIMIT: u64 = 42_000;

/// Intrinsic cost of a plain value transfer
const TRANSFER_GAS: u64 = 21_000;

/// Per-miner running balance for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Miner {
    /// Reward from blocks not yet past the confirmation depth
    pub immature: U256,
    /// Reward parked below the payout threshold or refunded after a
    /// failed payment
    pub balance: U256,
    /// Reward queued for payment this cycle, net of fees after costing
    pub pending: U256,
    /// Amount actually sent this cycle
    pub paid: U256,
}

/// Immutable record of one successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub timestamp: u64,
    pub hash: B256,
    pub to: String,
    pub amount: U256,
}

/// The subset of the RPC surface dispatch needs, separated so payment
/// paths can run against a scripted double in tests
pub trait PaymentRpc {
    fn estimate_gas(
        &self,
        tx: &TransactionRequest,
    ) -> impl std::future::Future<Output = Result<u64, EthRpcError>> + Send;
    fn send_transaction(
        &self,
        tx: &TransactionRequest,
    ) -> impl std::future::Future<Output = Result<B256, EthRpcError>> + Send;
}

impl PaymentRpc for EthRpcClient {
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, EthRpcError> {
        EthRpcClient::estimate_gas(self, tx).await
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, EthRpcError> {
        EthRpcClient::send_transaction(self, tx).await
    }
}

/// Seeds the cycle's miner map: the stored balance of every round
/// participant starts out queued for payment
pub fn init_miners(balances: &HashMap<String, U256>) -> HashMap<String, Miner> {
    balances
        .iter()
        .map(|(miner, balance)| {
            (
                miner.clone(),
                Miner {
                    pending: *balance,
                    ..Miner::default()
                },
            )
        })
        .collect()
}

/// Distributes each non-orphan entry's reward across its miners by share
/// weight. Integer division truncates; the remainder stays with the pool.
/// Confirmed rewards fold into pending, unconfirmed into immature.
pub fn fold_rewards(blocks: &mut [BlockData], miners: &mut HashMap<String, Miner>) {
    for block in blocks.iter_mut() {
        if block.orphan || block.skipped {
            continue;
        }

        if block.total_shares.is_zero() {
            warn!("Round {}:{} has no shares, nothing to credit", block.height, block.nonce);
            continue;
        }

        let share_miners: Vec<String> = block.shares.keys().cloned().collect();
        for miner in share_miners {
            let share = block.shares[&miner];
            let reward = block.reward * share / block.total_shares;

            block.share_rewards.insert(miner.clone(), reward);

            let account = miners.entry(miner).or_default();
            if block.confirmed {
                account.pending += reward;
            } else {
                account.immature += reward;
            }
        }
    }
}

/// Fee parameters and signer state fetched once per cycle
#[derive(Debug, Clone)]
pub struct TxParams {
    /// Template carrying from, nonce and fee fields for every payment
    pub template: TransactionRequest,
    /// Signer balance at the start of the cycle
    pub balance: U256,
    pub gas_price: U256,
    /// GAS_LIMIT * gas_price, the cost charged per payout transfer
    pub gas_cost: U256,
}

/// Fetches fee data, signer balance and pending nonce jointly and derives
/// the transaction template: EIP-1559 fields when the chain prices by fee
/// market, otherwise a 1.3x-bumped legacy gas price.
pub async fn fetch_tx_params(
    rpc: &EthRpcClient,
    signer: Address,
) -> Result<TxParams, UnlockerError> {
    let (fee_data, balance, nonce) = tokio::try_join!(
        rpc.get_fee_data(),
        rpc.get_balance(signer),
        rpc.get_transaction_count(signer)
    )?;

    let mut template = TransactionRequest {
        from: Some(signer),
        nonce: Some(nonce),
        ..TransactionRequest::default()
    };

    let gas_price = if let Some(max_fee) = fee_data.max_fee_per_gas {
        let max_priority = fee_data.max_priority_fee_per_gas.unwrap_or_default();
        template.tx_type = Some(2);
        template.max_fee_per_gas = Some(max_fee);
        template.max_priority_fee_per_gas = Some(max_priority);
        max_fee + max_priority
    } else if let Some(gas_price) = fee_data.gas_price {
        let bumped = gas_price * U256::from(13) / U256::from(10);
        template.tx_type = Some(0);
        template.gas_price = Some(bumped);
        bumped
    } else {
        return Err(UnlockerError::NoGasPrice);
    };

    let gas_cost = U256::from(GAS_LIMIT) * gas_price;

    debug!(
        "PoolBalance: {}, GasPrice: {} gwei, GasCost: {}",
        format_ether(balance),
        format_gwei(gas_price),
        format_ether(gas_cost)
    );

    Ok(TxParams {
        template,
        balance,
        gas_price,
        gas_cost,
    })
}

/// Pool-wide totals after costing
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CostSummary {
    /// Sum of pending across miners still eligible for payment
    pub total_pending: U256,
    pub total_immature: U256,
    pub total_balance: U256,
    /// Pool fees collected this cycle, net of the fee transfer's own gas
    pub pool_fees: U256,
}

/// Applies the payout threshold and fee deductions to every miner.
///
/// Pending below the threshold, or too small to cover the percent pool
/// fee plus one gas cost, is parked in balance for a later cycle.
/// Eligible pending pays the fee plus one gas cost. Collected fees below
/// one gas cost are foregone entirely since sending them would cost more
/// than they are worth.
pub fn apply_costs(
    miners: &mut HashMap<String, Miner>,
    threshold: U256,
    pool_fee_pct: u64,
    gas_cost: U256,
) -> CostSummary {
    let mut summary = CostSummary::default();

    for (name, miner) in miners.iter_mut() {
        let fees = miner.pending * U256::from(pool_fee_pct) / U256::from(100);

        if miner.pending < threshold || miner.pending < gas_cost + fees {
            miner.balance = miner.pending;
            miner.pending = U256::ZERO;
            continue;
        }

        miner.pending -= fees;
        summary.pool_fees += fees;

        miner.pending -= gas_cost;

        summary.total_pending += miner.pending;
        summary.total_immature += miner.immature;
        summary.total_balance += miner.balance;

        debug!(
            "Miner {name}: toPay: {}, immature: {}, bal: {}",
            format_ether(miner.pending),
            format_ether(miner.immature),
            format_ether(miner.balance)
        );
    }

    if !summary.pool_fees.is_zero() {
        if summary.pool_fees < gas_cost {
            debug!(
                "Omitting fee payment due to lower amount than gas costs {}",
                format_ether(summary.pool_fees)
            );
            summary.pool_fees = U256::ZERO;
        } else {
            summary.pool_fees -= gas_cost;
        }
    }

    summary
}

/// Credits unsent pending back into balance. Accumulates so a miner
/// parked earlier in the cycle keeps that balance.
fn rollback_to_balance(miner: &mut Miner) {
    miner.balance += miner.pending;
    miner.pending = U256::ZERO;
}

fn sorted_names(miners: &HashMap<String, Miner>) -> Vec<String> {
    let mut names: Vec<String> = miners.keys().cloned().collect();
    names.sort();
    names
}

/// The fee recipient, when fees were collected, an address is configured
/// and it is not the signer paying itself
fn fee_recipient(
    pool_fees: U256,
    pool_fee_address: Option<Address>,
    signer: Address,
) -> Option<Address> {
    pool_fee_address.filter(|address| !pool_fees.is_zero() && *address != signer)
}

/// One batched transfer through the sender contract. A failure means the
/// whole batch reverted: every included miner's pending is credited back
/// to balance, no partial success is assumed.
async fn send_batched<R: PaymentRpc>(
    rpc: &R,
    contracts: &ChainContracts,
    miners: &mut HashMap<String, Miner>,
    template: &TransactionRequest,
    pool_fees: U256,
    pool_fee_address: Option<Address>,
    now: u64,
) -> Vec<Payment> {
    let signer = template.from.unwrap_or(Address::ZERO);

    let mut recipients: Vec<Address> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut amounts: Vec<U256> = Vec::new();

    if let Some(fee_address) = fee_recipient(pool_fees, pool_fee_address, signer) {
        recipients.push(fee_address);
        names.push(fee_address.to_string().to_lowercase());
        amounts.push(pool_fees);
    }

    for name in sorted_names(miners) {
        match name.parse::<Address>() {
            Ok(address) => {
                recipients.push(address);
                amounts.push(miners[&name].pending);
                names.push(name);
            }
            Err(_) => {
                error!("Unparsable miner address {name}, crediting pending to balance");
                if let Some(miner) = miners.get_mut(&name) {
                    rollback_to_balance(miner);
                }
            }
        }
    }

    if recipients.is_empty() {
        return Vec::new();
    }

    let mut tx = template.clone();
    tx.to = Some(contracts.sender);
    tx.data = Some(ChainContracts::encode_send(recipients, amounts.clone(), GAS_LIMIT));

    let sent = async {
        tx.gas = Some(rpc.estimate_gas(&tx).await?);
        rpc.send_transaction(&tx).await
    }
    .await;

    match sent {
        Ok(hash) => names
            .into_iter()
            .zip(amounts)
            .map(|(to, amount)| {
                if let Some(miner) = miners.get_mut(&to) {
                    miner.paid = amount;
                    miner.pending = U256::ZERO;
                }
                debug!("Sent {} to {to} (hash: {hash})", format_ether(amount));
                Payment {
                    timestamp: now,
                    hash,
                    to,
                    amount,
                }
            })
            .collect(),
        Err(e) => {
            error!("Batch sender failed, reverting to balance: {e}");
            for miner in miners.values_mut() {
                rollback_to_balance(miner);
            }
            Vec::new()
        }
    }
}

/// Estimate-then-send for one plain transfer. Estimates above GAS_LIMIT
/// are rejected; estimates above the intrinsic transfer cost round up to
/// GAS_LIMIT for contract-backed recipient accounts.
async fn send_one<R: PaymentRpc>(
    rpc: &R,
    tx: &mut TransactionRequest,
) -> Result<B256, EthRpcError> {
    let gas = rpc.estimate_gas(tx).await?;

    if gas > GAS_LIMIT {
        return Err(EthRpcError::Parse(format!(
            "gas estimate {gas} exceeds limit {GAS_LIMIT}"
        )));
    }

    tx.gas = Some(if gas > TRANSFER_GAS { GAS_LIMIT } else { gas });

    rpc.send_transaction(tx).await
}

/// One transaction per recipient, fee recipient first. A per-recipient
/// failure credits only that pending back to balance and reuses the nonce
/// for the next recipient.
async fn send_sequential<R: PaymentRpc>(
    rpc: &R,
    miners: &mut HashMap<String, Miner>,
    template: &TransactionRequest,
    pool_fees: U256,
    pool_fee_address: Option<Address>,
    now: u64,
) -> Vec<Payment> {
    let signer = template.from.unwrap_or(Address::ZERO);
    let mut payments = Vec::new();

    let mut tx = template.clone();
    let mut nonce = template.nonce.unwrap_or(0);

    if let Some(fee_address) = fee_recipient(pool_fees, pool_fee_address, signer) {
        tx.to = Some(fee_address);
        tx.value = Some(pool_fees);
        tx.nonce = Some(nonce);

        match send_one(rpc, &mut tx).await {
            Ok(hash) => {
                payments.push(Payment {
                    timestamp: now,
                    hash,
                    to: fee_address.to_string().to_lowercase(),
                    amount: pool_fees,
                });
                nonce += 1;
                debug!("Sent {} to {fee_address} (hash: {hash})", format_ether(pool_fees));
            }
            Err(e) => error!("Pool fee payment failed: {e}"),
        }
    }

    for name in sorted_names(miners) {
        let pending = miners[&name].pending;
        if pending.is_zero() {
            continue;
        }

        let address = match name.parse::<Address>() {
            Ok(address) => address,
            Err(_) => {
                error!("Unparsable miner address {name}, crediting pending to balance");
                if let Some(miner) = miners.get_mut(&name) {
                    rollback_to_balance(miner);
                }
                continue;
            }
        };

        tx.to = Some(address);
        tx.value = Some(pending);
        tx.nonce = Some(nonce);

        match send_one(rpc, &mut tx).await {
            Ok(hash) => {
                payments.push(Payment {
                    timestamp: now,
                    hash,
                    to: name.clone(),
                    amount: pending,
                });

                if let Some(miner) = miners.get_mut(&name) {
                    miner.paid = pending;
                    miner.pending = U256::ZERO;
                }
                nonce += 1;

                debug!("Sent {} to {name} (hash: {hash}, nonce: {})", format_ether(pending), nonce - 1);
            }
            Err(e) => {
                error!("Payment to {name} failed, crediting pending to balance: {e}");
                if let Some(miner) = miners.get_mut(&name) {
                    rollback_to_balance(miner);
                }
            }
        }
    }

    payments
}

/// Dispatches the cycle's payouts through whichever path the chain
/// supports
pub async fn process_payments<R: PaymentRpc>(
    rpc: &R,
    contracts: Option<&ChainContracts>,
    miners: &mut HashMap<String, Miner>,
    template: &TransactionRequest,
    pool_fees: U256,
    pool_fee_address: Option<Address>,
    now: u64,
) -> Vec<Payment> {
    match contracts {
        Some(contracts) => {
            send_batched(rpc, contracts, miners, template, pool_fees, pool_fee_address, now).await
        }
        None => {
            send_sequential(rpc, miners, template, pool_fees, pool_fee_address, now).await
        }
    }
}

/// Outcome of the reward stage for one cycle
#[derive(Debug)]
pub struct RewardOutcome {
    pub miners: HashMap<String, Miner>,
    pub payments: Vec<Payment>,
    pub pool_fees: U256,
}

/// Runs the whole reward stage: fold, cost, solvency check, dispatch.
///
/// Aborts with `Insolvent` before sending anything when the signer cannot
/// cover the total pending payout.
#[allow(clippy::too_many_arguments)]
pub async fn calculate_rewards(
    rpc: &EthRpcClient,
    contracts: Option<&ChainContracts>,
    blocks: &mut [BlockData],
    balances: &HashMap<String, U256>,
    signer: Address,
    threshold: U256,
    pool_fee_pct: u64,
    pool_fee_address: Option<Address>,
    now: u64,
) -> Result<RewardOutcome, UnlockerError> {
    let mut miners = init_miners(balances);

    fold_rewards(blocks, &mut miners);

    let params = fetch_tx_params(rpc, signer).await?;
    let summary = apply_costs(&mut miners, threshold, pool_fee_pct, params.gas_cost);

    if params.balance < summary.total_pending {
        return Err(UnlockerError::Insolvent {
            signer,
            balance: format_ether(params.balance),
            pending: format_ether(summary.total_pending),
        });
    }

    debug!(
        "Total toPay: {}, immature: {}, balance: {}, poolFees: {}",
        format_ether(summary.total_pending),
        format_ether(summary.total_immature),
        format_ether(summary.total_balance),
        format_ether(summary.pool_fees)
    );

    let payments = if summary.total_pending.is_zero() {
        Vec::new()
    } else {
        process_payments(
            rpc,
            contracts,
            &mut miners,
            &params.template,
            summary.pool_fees,
            pool_fee_address,
            now,
        )
        .await
    };

    Ok(RewardOutcome {
        miners,
        payments,
        pool_fees: summary.pool_fees,
    })
}
