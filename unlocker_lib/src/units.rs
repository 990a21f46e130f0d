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

//! Currency unit conversions.
//!
//! Reward math runs in wei; the ledger store persists integer gwei strings.
//! The wei-to-gwei conversion truncates toward zero, so sub-gwei remainders
//! are dropped on every write-back. That matches the deployed ledgers this
//! reads and writes; changing it would change payout economics.

use alloy_primitives::U256;

const GWEI: u64 = 1_000_000_000;
const ETHER_DECIMALS: usize = 18;

/// Wei to an integer gwei string, truncating
pub fn to_gwei(wei: U256) -> String {
    (wei / U256::from(GWEI)).to_string()
}

/// Wei to an integer gwei delta for HINCRBY counters, truncating.
/// Saturates at i64::MAX, far beyond any realistic pool payout.
pub fn to_gwei_delta(wei: U256) -> i64 {
    let gwei = wei / U256::from(GWEI);
    i64::try_from(gwei).unwrap_or(i64::MAX)
}

/// Integer gwei string back to wei
pub fn from_gwei(gwei: &str) -> Option<U256> {
    let gwei: U256 = gwei.parse().ok()?;
    Some(gwei * U256::from(GWEI))
}

/// Human-readable ether amount for logs, full precision with trailing
/// zeros trimmed
pub fn format_ether(wei: U256) -> String {
    let raw = wei.to_string();
    let raw = format!("{raw:0>width$}", width = ETHER_DECIMALS + 1);
    let (whole, frac) = raw.split_at(raw.len() - ETHER_DECIMALS);
    let frac = frac.trim_end_matches('0');

    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

/// Human-readable gwei amount for logs
pub fn format_gwei(wei: U256) -> String {
    (wei / U256::from(GWEI)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_gwei_truncates() {
        assert_eq!(to_gwei(U256::from(1_999_999_999u64)), "1");
        assert_eq!(to_gwei(U256::from(2_000_000_000u64)), "2");
        assert_eq!(to_gwei(U256::ZERO), "0");
    }

    #[test]
    fn test_from_gwei_round_trip() {
        let wei = U256::from(5_000_000_000u64);
        assert_eq!(from_gwei(&to_gwei(wei)), Some(wei));
        assert_eq!(from_gwei("not a number"), None);
    }

    #[test]
    fn test_format_ether() {
        let five_ether = U256::from(5u64) * U256::from(10u64).pow(U256::from(18));
        assert_eq!(format_ether(five_ether), "5");
        assert_eq!(format_ether(U256::from(1_500_000_000_000_000_000u64)), "1.5");
        assert_eq!(format_ether(U256::from(1u64)), "0.000000000000000001");
        assert_eq!(format_ether(U256::ZERO), "0");
    }
}
