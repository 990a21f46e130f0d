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

//! Static block reward schedules per chain.
//!
//! Rewards are selected by fork height; chains with an on-chain reward
//! contract override these values at reconciliation time.

use alloy_primitives::U256;

pub const MAINNET: u64 = 1;
pub const CPUCHAIN: u64 = 6_516_853;

const GWEI: u64 = 1_000_000_000;

fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(GWEI) * U256::from(GWEI)
}

/// Fork schedule of a chain, ordered by ascending fork height
fn fork_schedule(chain_id: u64) -> Vec<(u64, U256)> {
    match chain_id {
        // homestead, byzantium, constantinople
        MAINNET => vec![(0, ether(5)), (4_370_000, ether(3)), (7_280_000, ether(2))],
        // flat schedule, live rewards come from the consensus contract
        CPUCHAIN => vec![(0, ether(2))],
        // unknown chains fall back to the mainnet schedule
        _ => fork_schedule(MAINNET),
    }
}

/// Base block reward at the given height.
///
/// Picks the entry with the greatest fork height strictly below `height`;
/// heights at or before every fork get the earliest entry's reward.
pub fn const_reward(chain_id: u64, height: u64) -> U256 {
    let schedule = fork_schedule(chain_id);

    for (fork_height, reward) in schedule.iter().rev() {
        if height > *fork_height {
            return *reward;
        }
    }

    schedule[0].1
}

/// Reward a block earns for including `uncle_count` uncles
pub fn nephew_reward(chain_id: u64, height: u64, uncle_count: usize) -> U256 {
    const_reward(chain_id, height) * U256::from(uncle_count) / U256::from(32)
}

/// Reward an uncle mined at `uncle_height` earns when included at `height`.
/// Decays by age in eighths and floors to zero at age 8.
pub fn uncle_reward(chain_id: u64, height: u64, uncle_height: u64) -> U256 {
    let age = height.saturating_sub(uncle_height).min(8);
    const_reward(chain_id, height) * U256::from(8 - age) / U256::from(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_reward_crosses_forks() {
        assert_eq!(const_reward(MAINNET, 1), ether(5));
        assert_eq!(const_reward(MAINNET, 4_370_000), ether(5));
        assert_eq!(const_reward(MAINNET, 4_370_001), ether(3));
        assert_eq!(const_reward(MAINNET, 7_280_001), ether(2));
        assert_eq!(const_reward(MAINNET, 20_000_000), ether(2));
    }

    #[test]
    fn test_const_reward_fallback_below_every_fork() {
        // height 0 precedes every fork, earliest entry applies
        assert_eq!(const_reward(MAINNET, 0), ether(5));
        assert_eq!(const_reward(CPUCHAIN, 0), ether(2));
    }

    #[test]
    fn test_unknown_chain_uses_mainnet_schedule() {
        assert_eq!(const_reward(424242, 100), const_reward(MAINNET, 100));
    }

    #[test]
    fn test_nephew_reward_truncates() {
        let base = const_reward(MAINNET, 100);
        assert_eq!(nephew_reward(MAINNET, 100, 3), base * U256::from(3) / U256::from(32));
        assert_eq!(nephew_reward(MAINNET, 100, 0), U256::ZERO);
    }

    #[test]
    fn test_uncle_reward_decays_with_age() {
        let base = const_reward(MAINNET, 100);
        assert_eq!(uncle_reward(MAINNET, 100, 99), base * U256::from(7) / U256::from(8));
        assert_eq!(uncle_reward(MAINNET, 100, 92), U256::ZERO);
        // floor stays at zero past age 8
        assert_eq!(uncle_reward(MAINNET, 100, 91), U256::ZERO);
    }
}
