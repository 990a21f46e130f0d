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

//! Typed store operations.
//!
//! The ledger writer plans a cycle's whole write-back as a `Vec<StoreOp>`
//! so the plan can be inspected and replayed in tests; `Store::exec_batch`
//! maps the plan onto one atomic MULTI pipeline.

use redis::Pipeline;

/// One store mutation inside the cycle's atomic write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// ZADD key score member
    ZAdd {
        key: String,
        score: u64,
        member: String,
    },
    /// ZREM key member
    ZRem { key: String, member: String },
    /// ZREMRANGEBYSCORE key -inf (bound, dropping every score below `bound`
    ZRemRangeBelow { key: String, bound: u64 },
    /// DEL key
    Del { key: String },
    /// RENAME from to
    Rename { from: String, to: String },
    /// HSET key field value
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// HSETNX key field value, keeping an existing field untouched
    HSetNx {
        key: String,
        field: String,
        value: String,
    },
    /// HINCRBY key field delta
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
}

impl StoreOp {
    /// Appends this op to a redis pipeline, discarding its reply
    pub fn apply_to_pipe(&self, pipe: &mut Pipeline) {
        match self {
            StoreOp::ZAdd { key, score, member } => {
                pipe.zadd(key, member, *score).ignore();
            }
            StoreOp::ZRem { key, member } => {
                pipe.zrem(key, member).ignore();
            }
            StoreOp::ZRemRangeBelow { key, bound } => {
                pipe.zrembyscore(key, "-inf", format!("({bound}")).ignore();
            }
            StoreOp::Del { key } => {
                pipe.del(key).ignore();
            }
            StoreOp::Rename { from, to } => {
                pipe.cmd("RENAME").arg(from).arg(to).ignore();
            }
            StoreOp::HSet { key, field, value } => {
                pipe.hset(key, field, value).ignore();
            }
            StoreOp::HSetNx { key, field, value } => {
                pipe.hset_nx(key, field, value).ignore();
            }
            StoreOp::HIncrBy { key, field, delta } => {
                pipe.hincr(key, field, *delta).ignore();
            }
        }
    }
}
