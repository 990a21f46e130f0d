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

//! Cycle orchestration: one `run_cycle` walks the whole pipeline from
//! backlog load to the atomic store write.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use ethrpc::EthRpcClient;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::contracts::ChainContracts;
use crate::error::UnlockerError;
use crate::payout::calculate_rewards;
use crate::reconcile::{fetch_chain_view, reconcile};
use crate::store::Store;
use crate::writer::plan_writes;

pub struct Unlocker {
    config: Config,
    store: Store,
    rpc: EthRpcClient,
    chain_id: u64,
    coinbase: Address,
    contracts: Option<ChainContracts>,
}

impl Unlocker {
    /// Connects to the store and the node, resolves the chain id, the
    /// signing account and the chain's contract set once for the process
    /// lifetime
    pub async fn connect(config: Config) -> Result<Self, UnlockerError> {
        let rpc = EthRpcClient::new(&config.rpc)?;
        let store = Store::connect(&config.redis.url, &config.coin).await?;

        let chain_id = rpc.chain_id().await?;
        let coinbase = match config.payouts.address {
            Some(address) => address,
            None => rpc.coinbase().await?,
        };
        let contracts = ChainContracts::resolve(chain_id);

        info!(
            "Connected to chain {chain_id}, coinbase {coinbase}, batch sender: {}",
            contracts.is_some()
        );

        Ok(Self {
            config,
            store,
            rpc,
            chain_id,
            coinbase,
            contracts,
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.config.unlocker.interval_secs
    }

    /// One full unlock pass over the backlog. Every store mutation lands
    /// in a single atomic batch at the end, so a failure anywhere before
    /// that leaves the backlog untouched for the next cycle.
    pub async fn run_cycle(&mut self) -> Result<(), UnlockerError> {
        let latest = self.rpc.block_number().await?;
        let unlocker = self.config.unlocker.clone();

        let mut blocks = self
            .store
            .load_backlog(latest, unlocker.depth, unlocker.immature_depth)
            .await?;

        if blocks.is_empty() {
            debug!("Nothing to unlock at height {latest}");
            return Ok(());
        }

        let miners = self.store.load_shares(&mut blocks).await?;
        let (balances, held_balances) = self.store.load_balances(&miners).await?;

        let view = fetch_chain_view(
            &self.rpc,
            self.contracts.as_ref(),
            self.coinbase,
            &blocks,
            latest,
        )
        .await?;

        let stats = reconcile(&mut blocks, &view, unlocker.depth, self.chain_id);
        info!(
            "Reconciled {} entries at height {latest}: {} blocks ({} confirmed), {} uncles, {} orphans, {} skipped",
            blocks.len(),
            stats.blocks,
            stats.confirmed,
            stats.uncles,
            stats.orphans,
            stats.skipped
        );

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let outcome = calculate_rewards(
            &self.rpc,
            self.contracts.as_ref(),
            &mut blocks,
            &balances,
            self.coinbase,
            self.config.payouts.threshold,
            unlocker.pool_fee,
            unlocker.pool_fee_address,
            now,
        )
        .await?;

        let ops = plan_writes(
            &self.config.coin,
            now,
            unlocker.window,
            unlocker.block_window,
            &blocks,
            &outcome.miners,
            &held_balances,
            &outcome.payments,
            outcome.pool_fees,
        );
        self.store.exec_batch(&ops).await?;

        if self.config.payouts.bgsave {
            self.store.bg_save().await?;
        }

        Ok(())
    }
}

/// Trigger handle for the single unlock worker. The capacity-1 channel
/// gives at-most-one queued cycle; triggers that arrive while the worker
/// is busy and one cycle is already queued are dropped.
#[derive(Clone)]
pub struct UnlockerHandle {
    trigger: mpsc::Sender<()>,
}

impl UnlockerHandle {
    /// Spawns the worker loop. The worker logs cycle failures and keeps
    /// serving triggers; it only exits when every handle is dropped.
    pub fn spawn(mut unlocker: Unlocker) -> Self {
        let (trigger, mut cycles) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            while cycles.recv().await.is_some() {
                if let Err(e) = unlocker.run_cycle().await {
                    error!("Error while processing pool unlock / payouts: {e}");
                }
            }
        });

        Self { trigger }
    }

    /// Requests an unlock cycle. A no-op when one is already queued.
    pub fn unlock(&self) {
        if self.trigger.try_send(()).is_err() {
            debug!("Unlock already in progress, dropping trigger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_triggers_while_busy_are_dropped() {
        let (trigger, mut cycles) = mpsc::channel::<()>(1);
        let handle = UnlockerHandle { trigger };

        // no worker is draining yet, so the first trigger fills the
        // queue and the rest are dropped
        handle.unlock();
        handle.unlock();
        handle.unlock();
        drop(handle);

        let mut delivered = 0;
        while cycles.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_worker_exits_when_handles_drop() {
        let (trigger, mut cycles) = mpsc::channel::<()>(1);
        let handle = UnlockerHandle { trigger };
        let cloned = handle.clone();

        drop(handle);
        drop(cloned);

        assert!(cycles.recv().await.is_none());
    }
}
