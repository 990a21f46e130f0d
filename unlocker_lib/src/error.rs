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

use alloy_primitives::Address;
use thiserror::Error;

/// Error raised by a pipeline cycle. The cycle supervisor logs these and
/// keeps running; nothing here terminates the process.
#[derive(Debug, Error)]
pub enum UnlockerError {
    #[error(transparent)]
    Rpc(#[from] ethrpc::EthRpcError),

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("contract call failed: {0}")]
    Contract(String),

    /// The signer cannot cover the cycle's total pending payout. Fatal for
    /// the cycle; raised before any transaction is submitted.
    #[error("signer {signer} balance {balance} under total payment {pending}")]
    Insolvent {
        signer: Address,
        balance: String,
        pending: String,
    },

    #[error("node reported no usable gas price")]
    NoGasPrice,
}
