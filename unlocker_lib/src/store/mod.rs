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

//! Ledger store access over redis.
//!
//! Reads pull the reconciliation backlog, share buckets and carried miner
//! balances; writes are batched into one atomic MULTI per cycle. Monetary
//! fields are stored as integer gwei strings.

pub mod ops;

use std::collections::{BTreeSet, HashMap, HashSet};

use alloy_primitives::U256;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use crate::block::BlockData;
use crate::error::UnlockerError;
use crate::units::from_gwei;
use ops::StoreOp;

/// Store key builders, shared between reads and the writer's planned ops
pub mod keys {
    pub fn candidates(coin: &str) -> String {
        format!("{coin}:blocks:candidates")
    }

    pub fn immature(coin: &str) -> String {
        format!("{coin}:blocks:immature")
    }

    pub fn matured(coin: &str) -> String {
        format!("{coin}:blocks:matured")
    }

    pub fn credits_all(coin: &str) -> String {
        format!("{coin}:credits:all")
    }

    pub fn finances(coin: &str) -> String {
        format!("{coin}:finances")
    }

    pub fn miner(coin: &str, address: &str) -> String {
        format!("{coin}:miners:{address}")
    }

    pub fn payments(coin: &str, address: &str) -> String {
        format!("{coin}:payments:{address}")
    }

    pub fn payments_all(coin: &str) -> String {
        format!("{coin}:payments:all")
    }
}

pub struct Store {
    conn: MultiplexedConnection,
    coin: String,
}

impl Store {
    pub async fn connect(url: &str, coin: &str) -> Result<Self, UnlockerError> {
        let client = redis::Client::open(url).map_err(UnlockerError::Store)?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn,
            coin: coin.to_string(),
        })
    }

    /// Loads every entry due for reconciliation: immature blocks at or
    /// below `latest - depth` and candidates at or below
    /// `latest - immature_depth`, in one atomic round trip. Malformed
    /// members are logged and dropped from the cycle.
    pub async fn load_backlog(
        &mut self,
        latest: u64,
        depth: u64,
        immature_depth: u64,
    ) -> Result<Vec<BlockData>, UnlockerError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZRANGEBYSCORE")
            .arg(keys::immature(&self.coin))
            .arg(0)
            .arg(latest.saturating_sub(depth))
            .arg("WITHSCORES");
        pipe.cmd("ZRANGEBYSCORE")
            .arg(keys::candidates(&self.coin))
            .arg(0)
            .arg(latest.saturating_sub(immature_depth))
            .arg("WITHSCORES");

        let (immature, candidates): (Vec<(String, u64)>, Vec<(String, u64)>) =
            pipe.query_async(&mut self.conn).await?;

        let mut blocks = Vec::with_capacity(immature.len() + candidates.len());

        for (member, height) in &immature {
            match BlockData::parse_immature(*height, member) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!("Dropping malformed immature member at {height}: {e}"),
            }
        }

        for (member, height) in &candidates {
            match BlockData::parse_candidate(*height, member) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!("Dropping malformed candidate member at {height}: {e}"),
            }
        }

        debug!(
            "Backlog: {} immature, {} candidates at head {latest}",
            immature.len(),
            candidates.len()
        );

        Ok(blocks)
    }

    /// Fills each entry's share bucket and returns the distinct miners
    /// across all entries, in deterministic order
    pub async fn load_shares(
        &mut self,
        blocks: &mut [BlockData],
    ) -> Result<Vec<String>, UnlockerError> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for block in blocks.iter() {
            pipe.hgetall(block.shares_key(&self.coin, block.height));
        }

        let shares: Vec<HashMap<String, String>> = pipe.query_async(&mut self.conn).await?;

        let mut miners = BTreeSet::new();

        for (block, bucket) in blocks.iter_mut().zip(shares) {
            for (miner, weight) in bucket {
                let weight: U256 = match weight.parse() {
                    Ok(weight) => weight,
                    Err(_) => {
                        warn!(
                            "Malformed share weight for {miner} in round {}: {weight}",
                            block.height
                        );
                        continue;
                    }
                };

                block.shares.insert(miner.clone(), weight);
                block.share_rewards.insert(miner.clone(), U256::ZERO);
                miners.insert(miner);
            }
        }

        Ok(miners.into_iter().collect())
    }

    /// Carried-forward balances for the given miners, in wei. Missing
    /// fields read as zero. Miners with a stored balance that does not
    /// parse are returned separately so the cycle leaves their balance
    /// field untouched rather than overwriting it.
    pub async fn load_balances(
        &mut self,
        miners: &[String],
    ) -> Result<(HashMap<String, U256>, HashSet<String>), UnlockerError> {
        let mut balances: HashMap<String, U256> =
            miners.iter().map(|m| (m.clone(), U256::ZERO)).collect();
        let mut held = HashSet::new();

        if miners.is_empty() {
            return Ok((balances, held));
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for miner in miners {
            pipe.hget(keys::miner(&self.coin, miner), "balance");
        }

        let stored: Vec<Option<String>> = pipe.query_async(&mut self.conn).await?;

        for (miner, balance) in miners.iter().zip(stored) {
            if let Some(balance) = balance {
                match from_gwei(&balance) {
                    Some(wei) => {
                        balances.insert(miner.clone(), wei);
                    }
                    None => {
                        warn!("Malformed stored balance for {miner}: {balance}");
                        held.insert(miner.clone());
                    }
                }
            }
        }

        Ok((balances, held))
    }

    /// Executes a planned write batch as one atomic MULTI. Partial
    /// application is not possible: either every op lands or none do.
    pub async fn exec_batch(&mut self, batch: &[StoreOp]) -> Result<(), UnlockerError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch {
            op.apply_to_pipe(&mut pipe);
        }

        let _: () = pipe.query_async(&mut self.conn).await?;
        Ok(())
    }

    /// Asks the store for a background persistence pass after a cycle
    pub async fn bg_save(&mut self) -> Result<(), UnlockerError> {
        let _: String = redis::cmd("BGSAVE").query_async(&mut self.conn).await?;
        Ok(())
    }
}
