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

//! Turns a reconciled cycle into a write plan for the store.
//!
//! The plan is a flat list of operations executed in one atomic batch, so
//! a crash mid-cycle leaves the backlog untouched and the next run redoes
//! the whole cycle. Skipped entries produce no operations at all, which is
//! what makes the redo safe.

use std::collections::{HashMap, HashSet};

use alloy_primitives::U256;
use tracing::debug;

use crate::block::{BlockData, Origin};
use crate::payout::{Miner, Payment};
use crate::store::keys;
use crate::store::ops::StoreOp;
use crate::units::{format_ether, to_gwei, to_gwei_delta};

fn block_hash(block: &BlockData) -> String {
    block
        .hash
        .map(|h| h.to_string())
        .unwrap_or_else(|| "0x0".to_string())
}

/// Removes the entry's backlog membership and its share bucket. Shared by
/// the matured and orphan paths; only matured entries add anything back.
fn cleanup_round(ops: &mut Vec<StoreOp>, coin: &str, block: &BlockData) {
    ops.push(StoreOp::Del {
        key: block.shares_key(coin, block.round_height),
    });

    match &block.origin {
        Origin::Candidate(member) => ops.push(StoreOp::ZRem {
            key: keys::candidates(coin),
            member: member.clone(),
        }),
        Origin::Immature(member) => {
            ops.push(StoreOp::ZRem {
                key: keys::immature(coin),
                member: member.clone(),
            });
            ops.push(StoreOp::Del {
                key: block.immature_credits_key(coin),
            });
        }
    }
}

fn plan_immature(ops: &mut Vec<StoreOp>, coin: &str, block: &BlockData) {
    if block.height != block.round_height {
        ops.push(StoreOp::Rename {
            from: block.shares_key(coin, block.round_height),
            to: block.shares_key(coin, block.height),
        });
    }

    if let Origin::Candidate(member) = &block.origin {
        ops.push(StoreOp::ZRem {
            key: keys::candidates(coin),
            member: member.clone(),
        });

        ops.push(StoreOp::ZAdd {
            key: keys::immature(coin),
            score: block.height,
            member: block.key(),
        });

        // immature credits are provisional, a later cycle overwrites the
        // whole entry on maturity, so only first writes stick
        let credits_key = block.immature_credits_key(coin);
        let mut miners: Vec<&String> = block.share_rewards.keys().collect();
        miners.sort();
        for miner in miners {
            ops.push(StoreOp::HSetNx {
                key: credits_key.clone(),
                field: miner.clone(),
                value: to_gwei(block.share_rewards[miner]),
            });
        }
    }
}

fn plan_matured(ops: &mut Vec<StoreOp>, coin: &str, block: &BlockData) {
    cleanup_round(ops, coin, block);

    ops.push(StoreOp::ZAdd {
        key: keys::matured(coin),
        score: block.height,
        member: block.key(),
    });

    ops.push(StoreOp::ZAdd {
        key: keys::credits_all(coin),
        score: block.height,
        member: format!(
            "{}:{}:{}",
            block_hash(block),
            block.timestamp,
            to_gwei(block.reward)
        ),
    });
}

/// Builds the cycle's full write plan.
///
/// `now` and `window` bound the payment history retention in seconds;
/// `block_window` bounds how many heights of matured blocks and credits
/// are kept below the newest maturity. Miners named in `held_balances`
/// keep their stored balance field as is.
#[allow(clippy::too_many_arguments)]
pub fn plan_writes(
    coin: &str,
    now: u64,
    window: u64,
    block_window: u64,
    blocks: &[BlockData],
    miners: &HashMap<String, Miner>,
    held_balances: &HashSet<String>,
    payments: &[Payment],
    pool_fees: U256,
) -> Vec<StoreOp> {
    let mut ops = Vec::new();

    ops.push(StoreOp::ZRemRangeBelow {
        key: keys::payments_all(coin),
        bound: now.saturating_sub(window),
    });

    let mut lowest_matured: Option<u64> = None;

    for block in blocks {
        if block.skipped {
            continue;
        }

        if block.orphan {
            cleanup_round(&mut ops, coin, block);
        } else if block.confirmed {
            plan_matured(&mut ops, coin, block);
            lowest_matured = Some(match lowest_matured {
                Some(height) => height.min(block.height),
                None => block.height,
            });
        } else {
            plan_immature(&mut ops, coin, block);
        }
    }

    if let Some(height) = lowest_matured {
        let bound = height.saturating_sub(block_window);
        ops.push(StoreOp::ZRemRangeBelow {
            key: keys::matured(coin),
            bound,
        });
        ops.push(StoreOp::ZRemRangeBelow {
            key: keys::credits_all(coin),
            bound,
        });
    }

    let mut total_immature = U256::ZERO;
    let mut total_balance = U256::ZERO;
    let mut total_pending = U256::ZERO;
    let mut total_paid = U256::ZERO;

    let mut names: Vec<&String> = miners.keys().collect();
    names.sort();

    for name in names {
        let miner = &miners[name];
        total_immature += miner.immature;
        total_balance += miner.balance;
        total_pending += miner.pending;
        total_paid += miner.paid;

        let key = keys::miner(coin, name);
        ops.push(StoreOp::HSet {
            key: key.clone(),
            field: "immature".to_string(),
            value: to_gwei(miner.immature),
        });
        if !held_balances.contains(name.as_str()) {
            ops.push(StoreOp::HSet {
                key: key.clone(),
                field: "balance".to_string(),
                value: to_gwei(miner.balance),
            });
        }
        ops.push(StoreOp::HSet {
            key: key.clone(),
            field: "pending".to_string(),
            value: to_gwei(miner.pending),
        });
        ops.push(StoreOp::HIncrBy {
            key,
            field: "paid".to_string(),
            delta: to_gwei_delta(miner.paid),
        });
    }

    let finances = keys::finances(coin);
    ops.push(StoreOp::HSet {
        key: finances.clone(),
        field: "immature".to_string(),
        value: to_gwei(total_immature),
    });
    ops.push(StoreOp::HSet {
        key: finances.clone(),
        field: "balance".to_string(),
        value: to_gwei(total_balance),
    });
    ops.push(StoreOp::HSet {
        key: finances.clone(),
        field: "pending".to_string(),
        value: to_gwei(total_pending),
    });
    ops.push(StoreOp::HIncrBy {
        key: finances.clone(),
        field: "poolFees".to_string(),
        delta: to_gwei_delta(pool_fees),
    });
    ops.push(StoreOp::HIncrBy {
        key: finances.clone(),
        field: "paid".to_string(),
        delta: to_gwei_delta(total_paid),
    });
    ops.push(StoreOp::HIncrBy {
        key: finances,
        field: "totalMined".to_string(),
        delta: to_gwei_delta(total_paid),
    });

    for payment in payments {
        let per_miner = keys::payments(coin, &payment.to);
        ops.push(StoreOp::ZRemRangeBelow {
            key: per_miner.clone(),
            bound: now.saturating_sub(window),
        });
        ops.push(StoreOp::ZAdd {
            key: per_miner,
            score: payment.timestamp,
            member: format!("{}:{}", payment.hash, to_gwei(payment.amount)),
        });
        ops.push(StoreOp::ZAdd {
            key: keys::payments_all(coin),
            score: payment.timestamp,
            member: format!("{}:{}:{}", payment.hash, payment.to, to_gwei(payment.amount)),
        });
    }

    debug!(
        "Planned writes for {} blocks, {} miners, {} txs, paid: {}, pending: {}, immature: {}, balance: {}",
        blocks.len(),
        miners.len(),
        payments.len(),
        format_ether(total_paid),
        format_ether(total_pending),
        format_ether(total_immature),
        format_ether(total_balance)
    );

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{candidate, ether, MemStore};
    use alloy_primitives::{b256, B256};

    const COIN: &str = "cpu";
    const HASH: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000aa");
    const NOW: u64 = 1_700_000_000;

    fn plan(blocks: &[BlockData]) -> Vec<StoreOp> {
        plan_writes(
            COIN,
            NOW,
            604_800,
            1_000,
            blocks,
            &HashMap::new(),
            &HashSet::new(),
            &[],
            U256::ZERO,
        )
    }

    #[test]
    fn test_skipped_entry_produces_no_ops() {
        let mut block = candidate(100, "0x0000000000000001");
        block.skipped = true;

        let ops = plan(&[block]);

        // only the standing retention and finance writes remain
        assert!(!ops.iter().any(|op| matches!(
            op,
            StoreOp::ZRem { .. } | StoreOp::ZAdd { .. } | StoreOp::Del { .. }
        )));
    }

    #[test]
    fn test_candidate_moves_to_immature_with_credits() {
        let mut block = candidate(100, "0x0000000000000001");
        block.hash = Some(HASH);
        block.reward = ether(2);
        block
            .share_rewards
            .insert("0xabc".to_string(), ether(2));

        let ops = plan(&[block.clone()]);

        assert!(ops.contains(&StoreOp::ZRem {
            key: keys::candidates(COIN),
            member: match &block.origin {
                crate::block::Origin::Candidate(m) => m.clone(),
                _ => unreachable!(),
            },
        }));
        assert!(ops.contains(&StoreOp::ZAdd {
            key: keys::immature(COIN),
            score: 100,
            member: block.key(),
        }));
        assert!(ops.contains(&StoreOp::HSetNx {
            key: block.immature_credits_key(COIN),
            field: "0xabc".to_string(),
            value: to_gwei(ether(2)),
        }));
    }

    #[test]
    fn test_matured_block_cleans_up_and_records_credit() {
        let mut block = candidate(100, "0x0000000000000001");
        block.hash = Some(HASH);
        block.confirmed = true;
        block.reward = ether(2);

        let mut store = MemStore::default();
        store.apply_all(&plan(&[block.clone()]));

        let matured = store.zset(&keys::matured(COIN));
        assert_eq!(matured, vec![(block.key(), 100)]);

        let credits = store.zset(&keys::credits_all(COIN));
        assert_eq!(credits.len(), 1);
        assert!(credits[0].0.starts_with(&HASH.to_string()));
        assert!(credits[0].0.ends_with(&to_gwei(ether(2))));
    }

    #[test]
    fn test_orphan_cleanup_adds_nothing_back() {
        let mut block = candidate(100, "0x0000000000000001");
        block.orphan = true;

        let mut store = MemStore::default();
        // seed the candidate entry the cleanup should remove
        let member = match &block.origin {
            crate::block::Origin::Candidate(m) => m.clone(),
            _ => unreachable!(),
        };
        store.apply(&StoreOp::ZAdd {
            key: keys::candidates(COIN),
            score: 100,
            member,
        });

        store.apply_all(&plan(&[block]));

        assert!(store.zset(&keys::candidates(COIN)).is_empty());
        assert!(store.zset(&keys::matured(COIN)).is_empty());
        assert!(store.zset(&keys::immature(COIN)).is_empty());
    }

    #[test]
    fn test_reorged_immature_renames_share_bucket() {
        let mut block = candidate(100, "0x0000000000000001");
        block.height = 102;
        block.hash = Some(HASH);

        let ops = plan(&[block.clone()]);

        assert!(ops.contains(&StoreOp::Rename {
            from: block.shares_key(COIN, 100),
            to: block.shares_key(COIN, 102),
        }));
    }

    #[test]
    fn test_retention_trims_below_block_window() {
        let mut block = candidate(5_000, "0x0000000000000001");
        block.hash = Some(HASH);
        block.confirmed = true;

        let ops = plan(&[block]);

        assert!(ops.contains(&StoreOp::ZRemRangeBelow {
            key: keys::matured(COIN),
            bound: 4_000,
        }));
        assert!(ops.contains(&StoreOp::ZRemRangeBelow {
            key: keys::credits_all(COIN),
            bound: 4_000,
        }));
    }

    #[test]
    fn test_miner_ledger_and_finances() {
        let miners = HashMap::from([(
            "0xabc".to_string(),
            Miner {
                immature: ether(1),
                balance: ether(2),
                pending: U256::ZERO,
                paid: ether(3),
            },
        )]);

        let mut store = MemStore::default();
        store.apply_all(&plan_writes(
            COIN,
            NOW,
            604_800,
            1_000,
            &[],
            &miners,
            &HashSet::new(),
            &[],
            ether(1),
        ));

        let miner_key = keys::miner(COIN, "0xabc");
        assert_eq!(store.hash_field(&miner_key, "immature"), Some("1000000000"));
        assert_eq!(store.hash_field(&miner_key, "balance"), Some("2000000000"));
        assert_eq!(store.hash_field(&miner_key, "pending"), Some("0"));
        assert_eq!(store.hash_field(&miner_key, "paid"), Some("3000000000"));

        let finances = keys::finances(COIN);
        assert_eq!(store.hash_field(&finances, "poolFees"), Some("1000000000"));
        assert_eq!(store.hash_field(&finances, "paid"), Some("3000000000"));
        assert_eq!(store.hash_field(&finances, "totalMined"), Some("3000000000"));
    }

    #[test]
    fn test_held_balance_field_is_not_overwritten() {
        let miners = HashMap::from([(
            "0xabc".to_string(),
            Miner {
                immature: ether(1),
                ..Miner::default()
            },
        )]);
        let held = HashSet::from(["0xabc".to_string()]);

        let mut store = MemStore::default();
        let miner_key = keys::miner(COIN, "0xabc");
        // an unparsable stored balance awaiting operator repair
        store.apply(&StoreOp::HSet {
            key: miner_key.clone(),
            field: "balance".to_string(),
            value: "bogus".to_string(),
        });

        store.apply_all(&plan_writes(
            COIN,
            NOW,
            604_800,
            1_000,
            &[],
            &miners,
            &held,
            &[],
            U256::ZERO,
        ));

        assert_eq!(store.hash_field(&miner_key, "balance"), Some("bogus"));
        assert_eq!(store.hash_field(&miner_key, "immature"), Some("1000000000"));
    }

    #[test]
    fn test_payments_append_to_history_with_retention() {
        let payment = Payment {
            timestamp: NOW,
            hash: HASH,
            to: "0xabc".to_string(),
            amount: ether(5),
        };

        let mut store = MemStore::default();
        // a stale record outside the retention window
        store.apply(&StoreOp::ZAdd {
            key: keys::payments(COIN, "0xabc"),
            score: NOW - 700_000,
            member: "old".to_string(),
        });

        store.apply_all(&plan_writes(
            COIN,
            NOW,
            604_800,
            1_000,
            &[],
            &HashMap::new(),
            &HashSet::new(),
            &[payment],
            U256::ZERO,
        ));

        let history = store.zset(&keys::payments(COIN, "0xabc"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, format!("{HASH}:{}", to_gwei(ether(5))));

        let all = store.zset(&keys::payments_all(COIN));
        assert_eq!(all[0].0, format!("{HASH}:0xabc:{}", to_gwei(ether(5))));
    }

    #[test]
    fn test_replaying_a_plan_is_idempotent() {
        let mut block = candidate(100, "0x0000000000000001");
        block.hash = Some(HASH);
        block.confirmed = true;
        block.reward = ether(2);

        let miners = HashMap::from([(
            "0xabc".to_string(),
            Miner {
                balance: ether(1),
                ..Miner::default()
            },
        )]);

        let ops = plan_writes(
            COIN,
            NOW,
            604_800,
            1_000,
            &[block],
            &miners,
            &HashSet::new(),
            &[],
            U256::ZERO,
        );

        let mut once = MemStore::default();
        once.apply_all(&ops);

        // a crash between exec and backlog refresh replays the same plan;
        // set writes and HSETs converge, only HINCRBYs would drift, and
        // they carry zero deltas when nothing was paid
        let mut twice = MemStore::default();
        twice.apply_all(&ops);
        twice.apply_all(&ops);

        assert_eq!(once.zset(&keys::matured(COIN)), twice.zset(&keys::matured(COIN)));
        assert_eq!(
            once.hash_field(&keys::miner(COIN, "0xabc"), "balance"),
            twice.hash_field(&keys::miner(COIN, "0xabc"), "balance")
        );
    }
}
