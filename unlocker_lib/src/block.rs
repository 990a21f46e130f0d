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

//! Ledger entry for one provisional block credit.
//!
//! Entries are parsed from the store's candidate and immature sorted sets,
//! classified against the chain by the reconciler, credited by the payout
//! engine and retired by the ledger writer.

use std::collections::HashMap;

use alloy_primitives::{B64, B256, U256};
use thiserror::Error;

/// Which backlog set an entry was parsed from, carrying the exact member
/// string so the writer can target removal. Exactly one origin per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Member of {coin}:blocks:candidates
    Candidate(String),
    /// Member of {coin}:blocks:immature
    Immature(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseEntryError {
    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
    #[error("invalid {field}: {value}")]
    Field { field: &'static str, value: String },
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ParseEntryError> {
    value.parse().map_err(|_| ParseEntryError::Field {
        field,
        value: value.to_string(),
    })
}

/// A provisional or reconciled block credit
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Working height; corrected to the matched block's height on reorg
    pub height: u64,
    /// Height the round was recorded at; keeps the share bucket addressable
    pub round_height: u64,

    pub timestamp: u64,
    pub difficulty: U256,
    /// Sum of share weights contributed this round
    pub total_shares: U256,

    pub uncle: bool,
    pub uncle_height: u64,
    pub orphan: bool,
    pub confirmed: bool,
    /// Entry untouched this cycle because its chain lookup failed; the
    /// writer must not emit anything for it so it stays in the backlog
    pub skipped: bool,

    pub hash: Option<B256>,
    /// Proof-of-work nonce in its stored string form, the stable match key
    pub nonce: String,
    pub pow_hash: Option<String>,
    pub mix_digest: Option<String>,

    /// Reward in wei; zero until reconciled, zero forever for orphans
    pub reward: U256,

    pub origin: Origin,

    /// Miner address -> share weight for this round
    pub shares: HashMap<String, U256>,
    /// Miner address -> reward owed in wei, filled by the payout engine
    pub share_rewards: HashMap<String, U256>,
}

impl BlockData {
    /// Parses a candidate member:
    /// `nonce:powHash:mixDigest:timestamp:difficulty:totalShares`
    pub fn parse_candidate(height: u64, member: &str) -> Result<Self, ParseEntryError> {
        let fields: Vec<&str> = member.split(':').collect();
        if fields.len() != 6 {
            return Err(ParseEntryError::FieldCount {
                expected: 6,
                got: fields.len(),
            });
        }

        Ok(BlockData {
            height,
            round_height: height,
            timestamp: parse_field("timestamp", fields[3])?,
            difficulty: parse_field("difficulty", fields[4])?,
            total_shares: parse_field("totalShares", fields[5])?,
            uncle: false,
            uncle_height: 0,
            orphan: false,
            confirmed: false,
            skipped: false,
            hash: None,
            nonce: fields[0].to_string(),
            pow_hash: Some(fields[1].to_string()),
            mix_digest: Some(fields[2].to_string()),
            reward: U256::ZERO,
            origin: Origin::Candidate(member.to_string()),
            shares: HashMap::new(),
            share_rewards: HashMap::new(),
        })
    }

    /// Parses an immature member:
    /// `uncleHeight:orphan01:nonce:hash:timestamp:difficulty:totalShares:rewardWei`
    pub fn parse_immature(height: u64, member: &str) -> Result<Self, ParseEntryError> {
        let fields: Vec<&str> = member.split(':').collect();
        if fields.len() != 8 {
            return Err(ParseEntryError::FieldCount {
                expected: 8,
                got: fields.len(),
            });
        }

        let uncle_height: u64 = parse_field("uncleHeight", fields[0])?;
        let orphan: u8 = parse_field("orphan", fields[1])?;
        let hash = match fields[3] {
            "0x0" => None,
            hash => Some(parse_field("hash", hash)?),
        };

        Ok(BlockData {
            height,
            round_height: height,
            timestamp: parse_field("timestamp", fields[4])?,
            difficulty: parse_field("difficulty", fields[5])?,
            total_shares: parse_field("totalShares", fields[6])?,
            uncle: uncle_height > 0,
            uncle_height,
            orphan: orphan != 0,
            confirmed: false,
            skipped: false,
            hash,
            nonce: fields[2].to_string(),
            pow_hash: None,
            mix_digest: None,
            reward: parse_field("reward", fields[7])?,
            origin: Origin::Immature(member.to_string()),
            shares: HashMap::new(),
            share_rewards: HashMap::new(),
        })
    }

    /// Serializes the entry in the immature member form
    pub fn key(&self) -> String {
        let hash = self
            .hash
            .map(|h| h.to_string())
            .unwrap_or_else(|| "0x0".to_string());

        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.uncle_height,
            u8::from(self.orphan),
            self.nonce,
            hash,
            self.timestamp,
            self.difficulty,
            self.total_shares,
            self.reward
        )
    }

    /// Nonce in canonical 8-byte form, None when the stored string is
    /// malformed
    pub fn nonce_bytes(&self) -> Option<B64> {
        self.nonce.parse().ok()
    }

    /// Store key of this round's share bucket at the given height
    pub fn shares_key(&self, coin: &str, height: u64) -> String {
        format!("{coin}:shares:round{height}:{}", self.nonce)
    }

    /// Store key of the per-miner immature credit hash
    pub fn immature_credits_key(&self, coin: &str) -> String {
        let hash = self
            .hash
            .map(|h| h.to_string())
            .unwrap_or_else(|| "0x0".to_string());
        format!("{coin}:credits:immature:{}:{hash}", self.height)
    }
}
