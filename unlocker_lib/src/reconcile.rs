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

//! Chain reconciliation: matches backlog entries against fetched blocks.
//!
//! Fetching and classification are separate steps. `fetch_chain_view` does
//! the batched, deduplicated chain I/O; `classify` is a pure function from
//! one entry plus the fetched view to an outcome, applied in bulk by
//! `reconcile`. Matching by nonce is authoritative over hash: a block
//! displaced by a reorg keeps its nonce but gets a new hash and height.

use std::collections::{BTreeSet, HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use ethrpc::{ChainBlock, EthRpcClient, UncleBlock};
use tracing::{debug, warn};

use crate::block::BlockData;
use crate::contracts::ChainContracts;
use crate::error::UnlockerError;
use crate::rewards::{const_reward, nephew_reward, uncle_reward};
use crate::units::format_ether;

/// Everything the classifier needs from the chain, fetched once per cycle
#[derive(Debug, Default)]
pub struct ChainView {
    /// Chain head height at the start of the cycle
    pub latest: u64,
    /// Fetched block (with receipts and uncles) per referenced height;
    /// None when the node has no block there
    pub blocks: HashMap<u64, Option<ChainBlock>>,
    /// Heights whose fetch failed in transit; entries at these heights are
    /// skipped this cycle instead of being classified
    pub failed: HashSet<u64>,
    /// Contract-reported reward per height, when the chain has a
    /// consensus-view binding
    pub contract_rewards: HashMap<u64, U256>,
}

/// Classification of one ledger entry against the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Matched a canonical block; height is the matched block's real height
    Block {
        height: u64,
        hash: B256,
        reward: U256,
        confirmed: bool,
    },
    /// Matched an uncle included by a nearby canonical block
    Uncle {
        uncle_height: u64,
        hash: B256,
        reward: U256,
        confirmed: bool,
    },
    /// No matching block or uncle on the chain
    Orphan,
    /// Chain lookup failed; leave the entry untouched and retry next cycle
    Skipped,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub blocks: usize,
    pub confirmed: usize,
    pub uncles: usize,
    pub orphans: usize,
    pub skipped: usize,
}

/// Fetches every height the entry set references, deduplicated, with the
/// block/receipt/uncle fan-out issued concurrently. Per-height transport
/// failures are recorded in the view rather than failing the cycle; a
/// multicall failure aborts the cycle since every reward would be wrong.
pub async fn fetch_chain_view(
    rpc: &EthRpcClient,
    contracts: Option<&ChainContracts>,
    coinbase: Address,
    entries: &[BlockData],
    latest: u64,
) -> Result<ChainView, UnlockerError> {
    let heights: Vec<u64> = entries
        .iter()
        .map(|entry| entry.height)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let fetched =
        futures::future::join_all(heights.iter().map(|height| rpc.fetch_block(*height))).await;

    let mut view = ChainView {
        latest,
        ..ChainView::default()
    };

    for (height, result) in heights.iter().zip(fetched) {
        match result {
            Ok(block) => {
                view.blocks.insert(*height, block);
            }
            Err(e) => {
                warn!("Failed to fetch block {height}, skipping its entries this cycle: {e}");
                view.failed.insert(*height);
            }
        }
    }

    if let Some(contracts) = contracts {
        view.contract_rewards = contracts
            .batch_block_rewards(rpc, &heights, coinbase)
            .await?;
    }

    Ok(view)
}

fn in_reorg_window(number: u64, height: u64, depth: u64) -> bool {
    number < height + depth && number > height.saturating_sub(depth)
}

/// Base and nephew rewards for a matched block. A non-zero contract
/// lookup overrides the schedule and already accounts for uncles.
fn block_rewards(view: &ChainView, chain_id: u64, block: &ChainBlock) -> (U256, U256) {
    match view.contract_rewards.get(&block.number) {
        Some(reward) if !reward.is_zero() => (*reward, U256::ZERO),
        _ => (
            const_reward(chain_id, block.number),
            nephew_reward(chain_id, block.number, block.uncle_count),
        ),
    }
}

/// Pure classification of one entry against the fetched view.
///
/// `depth` is both the reorg search radius (strictly between
/// height ± depth) and the confirmation depth.
pub fn classify(entry: &BlockData, view: &ChainView, depth: u64, chain_id: u64) -> Outcome {
    if view.failed.contains(&entry.height) {
        return Outcome::Skipped;
    }

    let nonce = entry.nonce_bytes();

    let on_height = match view.blocks.get(&entry.height) {
        Some(Some(block)) => block,
        // The node has no block at this height at all
        _ => return Outcome::Orphan,
    };

    let same_block = entry.hash.is_some_and(|hash| hash == on_height.hash)
        || (nonce.is_some() && on_height.nonce == nonce);

    let found = if same_block {
        Some(on_height)
    } else {
        // A reorg moved the block: search nearby heights by nonce
        view.blocks.values().flatten().find(|block| {
            in_reorg_window(block.number, entry.height, depth)
                && nonce.is_some()
                && block.nonce == nonce
        })
    };

    if let Some(found) = found {
        let (block_reward, uncle_rewards) = block_rewards(view, chain_id, found);

        return Outcome::Block {
            height: found.number,
            hash: found.hash,
            reward: block_reward + uncle_rewards + found.tx_fees,
            confirmed: found.number + depth < view.latest,
        };
    }

    let uncle: Option<&UncleBlock> = view
        .blocks
        .values()
        .flatten()
        .flat_map(|block| block.uncles.iter())
        .find(|uncle| {
            in_reorg_window(uncle.number, entry.height, depth)
                && nonce.is_some()
                && uncle.nonce == nonce
        });

    if let Some(uncle) = uncle {
        let reward = match view.contract_rewards.get(&entry.height) {
            Some(reward) if !reward.is_zero() => U256::ZERO,
            _ => uncle_reward(chain_id, entry.height, uncle.number),
        };

        return Outcome::Uncle {
            uncle_height: uncle.number,
            hash: uncle.hash,
            reward,
            confirmed: uncle.number + depth < view.latest,
        };
    }

    Outcome::Orphan
}

/// Applies one outcome to its entry. Classification flags are overwritten
/// so exactly one of matured / immature / orphan holds afterwards.
fn apply_outcome(entry: &mut BlockData, outcome: &Outcome) {
    match outcome {
        Outcome::Block {
            height,
            hash,
            reward,
            confirmed,
        } => {
            entry.height = *height;
            entry.hash = Some(*hash);
            entry.reward = *reward;
            entry.confirmed = *confirmed;
            entry.uncle = false;
            entry.uncle_height = 0;
            entry.orphan = false;
            entry.skipped = false;
        }
        Outcome::Uncle {
            uncle_height,
            hash,
            reward,
            confirmed,
        } => {
            entry.uncle = true;
            entry.uncle_height = *uncle_height;
            entry.hash = Some(*hash);
            entry.reward = *reward;
            entry.confirmed = *confirmed;
            entry.orphan = false;
            entry.skipped = false;
        }
        Outcome::Orphan => {
            entry.orphan = true;
            entry.confirmed = false;
            entry.reward = U256::ZERO;
            entry.skipped = false;
        }
        Outcome::Skipped => {
            entry.skipped = true;
        }
    }
}

/// Classifies the whole backlog against the view, mutating entries in
/// place and returning the cycle's counters
pub fn reconcile(
    entries: &mut [BlockData],
    view: &ChainView,
    depth: u64,
    chain_id: u64,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();

    for entry in entries.iter_mut() {
        let outcome = classify(entry, view, depth, chain_id);

        match &outcome {
            Outcome::Block {
                height,
                hash,
                reward,
                confirmed,
            } => {
                stats.blocks += 1;
                if *confirmed {
                    stats.confirmed += 1;
                }
                debug!(
                    "{} block {height} with {} miners, reward {} (hash: {hash})",
                    if *confirmed { "Confirmed" } else { "Mature" },
                    entry.shares.len(),
                    format_ether(*reward),
                );
            }
            Outcome::Uncle {
                uncle_height,
                hash,
                reward,
                confirmed,
            } => {
                stats.uncles += 1;
                if *confirmed {
                    stats.confirmed += 1;
                }
                debug!(
                    "{} uncle {}/{uncle_height} of reward {} (hash: {hash})",
                    if *confirmed { "Confirmed" } else { "Mature" },
                    entry.height,
                    format_ether(*reward),
                );
            }
            Outcome::Orphan => {
                stats.orphans += 1;
                warn!("Orphaned block {}:{}", entry.height, entry.nonce);
            }
            Outcome::Skipped => {
                stats.skipped += 1;
            }
        }

        apply_outcome(entry, &outcome);
    }

    debug!(
        "blocks: {}, confirmed: {}, uncles: {}, orphans: {}, skipped: {}",
        stats.blocks, stats.confirmed, stats.uncles, stats.orphans, stats.skipped
    );

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{candidate, chain_block, view_with};
    use alloy_primitives::b256;

    const HASH_A: B256 =
        b256!("00000000000000000000000000000000000000000000000000000000000000aa");
    const HASH_B: B256 =
        b256!("00000000000000000000000000000000000000000000000000000000000000bb");

    #[test]
    fn test_missing_block_is_orphaned() {
        let entry = candidate(100, "0x0000000000000001");
        let view = view_with(1000, vec![(100, None)]);

        assert_eq!(classify(&entry, &view, 8, 1), Outcome::Orphan);
    }

    #[test]
    fn test_nonce_match_on_height_matures() {
        let entry = candidate(100, "0x0000000000000001");
        let block = chain_block(100, HASH_A, "0x0000000000000001");
        let view = view_with(1000, vec![(100, Some(block))]);

        let outcome = classify(&entry, &view, 8, 1);
        match outcome {
            Outcome::Block {
                height,
                hash,
                reward,
                confirmed,
            } => {
                assert_eq!(height, 100);
                assert_eq!(hash, HASH_A);
                assert_eq!(reward, const_reward(1, 100));
                assert!(confirmed);
            }
            other => panic!("expected block outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_reorg_moves_the_block_and_corrects_height() {
        // a different block sits on the recorded height; ours moved to 102
        let mut entry = candidate(100, "0x0000000000000001");
        let wrong = chain_block(100, HASH_B, "0x00000000000000ff");
        let moved = chain_block(102, HASH_A, "0x0000000000000001");
        let view = view_with(1000, vec![(100, Some(wrong)), (102, Some(moved))]);

        let outcome = classify(&entry, &view, 8, 1);
        assert!(matches!(outcome, Outcome::Block { height: 102, .. }));

        apply_outcome(&mut entry, &outcome);
        assert_eq!(entry.height, 102);
        assert_eq!(entry.round_height, 100);
        assert!(!entry.orphan);
    }

    #[test]
    fn test_reorg_window_is_exclusive() {
        let entry = candidate(100, "0x0000000000000001");
        let wrong = chain_block(100, HASH_B, "0x00000000000000ff");
        // exactly at height + depth, outside the strict window
        let too_far = chain_block(108, HASH_A, "0x0000000000000001");
        let view = view_with(1000, vec![(100, Some(wrong)), (108, Some(too_far))]);

        assert_eq!(classify(&entry, &view, 8, 1), Outcome::Orphan);
    }

    #[test]
    fn test_uncle_match_pays_decayed_reward() {
        let entry = candidate(100, "0x0000000000000002");
        let mut block = chain_block(100, HASH_A, "0x0000000000000001");
        block.uncles.push(UncleBlock {
            number: 99,
            hash: HASH_B,
            nonce: "0x0000000000000002".parse().ok(),
        });
        block.uncle_count = 1;
        let view = view_with(1000, vec![(100, Some(block))]);

        match classify(&entry, &view, 8, 1) {
            Outcome::Uncle {
                uncle_height,
                reward,
                confirmed,
                ..
            } => {
                assert_eq!(uncle_height, 99);
                assert_eq!(reward, uncle_reward(1, 100, 99));
                assert!(confirmed);
            }
            other => panic!("expected uncle outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_contract_reward_overrides_schedule() {
        let entry = candidate(100, "0x0000000000000001");
        let mut block = chain_block(100, HASH_A, "0x0000000000000001");
        block.uncle_count = 2;
        block.tx_fees = U256::from(5u64);
        let mut view = view_with(1000, vec![(100, Some(block))]);
        view.contract_rewards.insert(100, U256::from(1_000u64));

        match classify(&entry, &view, 8, 1) {
            Outcome::Block { reward, .. } => {
                // contract value replaces base + nephew, tx fees still added
                assert_eq!(reward, U256::from(1_005u64));
            }
            other => panic!("expected block outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_contract_reward_falls_back_to_schedule() {
        let entry = candidate(100, "0x0000000000000001");
        let block = chain_block(100, HASH_A, "0x0000000000000001");
        let mut view = view_with(1000, vec![(100, Some(block))]);
        view.contract_rewards.insert(100, U256::ZERO);

        match classify(&entry, &view, 8, 1) {
            Outcome::Block { reward, .. } => assert_eq!(reward, const_reward(1, 100)),
            other => panic!("expected block outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_confirmation_depth_is_strict() {
        let entry = candidate(100, "0x0000000000000001");
        let block = chain_block(100, HASH_A, "0x0000000000000001");
        // 100 + 8 == latest: not yet confirmed
        let view = view_with(108, vec![(100, Some(block))]);

        match classify(&entry, &view, 8, 1) {
            Outcome::Block { confirmed, .. } => assert!(!confirmed),
            other => panic!("expected block outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_fetch_skips_the_entry() {
        let mut entry = candidate(100, "0x0000000000000001");
        let mut view = view_with(1000, vec![]);
        view.failed.insert(100);

        let outcome = classify(&entry, &view, 8, 1);
        assert_eq!(outcome, Outcome::Skipped);

        apply_outcome(&mut entry, &outcome);
        assert!(entry.skipped);
        assert!(!entry.orphan);
    }

    #[test]
    fn test_reconcile_counts_outcomes() {
        let mut entries = vec![
            candidate(100, "0x0000000000000001"),
            candidate(101, "0x0000000000000002"),
        ];
        let block = chain_block(100, HASH_A, "0x0000000000000001");
        let view = view_with(1000, vec![(100, Some(block)), (101, None)]);

        let stats = reconcile(&mut entries, &view, 8, 1);
        assert_eq!(
            stats,
            ReconcileStats {
                blocks: 1,
                confirmed: 1,
                uncles: 0,
                orphans: 1,
                skipped: 0,
            }
        );
        assert!(entries[1].orphan);
        assert_eq!(entries[1].reward, U256::ZERO);
    }
}
