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

use alloy_primitives::{Address, U256};
use ethrpc::EthRpcConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// redis[s]://[[username][:password]@][host][:port][/db-number]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UnlockerConfig {
    /// Pool fee in whole percent taken from each payout
    #[serde(default)]
    pub pool_fee: u64,
    /// Where collected fees are sent; fees accrue unsent when unset
    pub pool_fee_address: Option<Address>,
    /// Confirmations required before a reward is paid, and the reorg
    /// search radius around a recorded height
    #[serde(default = "default_depth")]
    pub depth: u64,
    /// Minimum age before a candidate is even looked at
    #[serde(default = "default_immature_depth")]
    pub immature_depth: u64,
    /// Payment history retention in seconds
    #[serde(default = "default_window")]
    pub window: u64,
    /// Matured block and credit retention in block heights
    #[serde(default = "default_block_window")]
    pub block_window: u64,
    /// Seconds between unlock cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayoutConfig {
    /// Signing account; the node's coinbase when unset
    pub address: Option<Address>,
    /// Minimum pending amount before a payment is sent, in wei
    #[serde(default, deserialize_with = "deserialize_wei")]
    pub threshold: U256,
    /// Ask the store for a background save after each cycle
    #[serde(default = "default_bgsave")]
    pub bgsave: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log to file if specified
    pub file: Option<String>,
    /// Log level (defaults to "info")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

fn default_depth() -> u64 {
    120
}

fn default_immature_depth() -> u64 {
    40
}

fn default_window() -> u64 {
    604_800
}

fn default_block_window() -> u64 {
    5_000
}

fn default_interval_secs() -> u64 {
    600
}

fn default_bgsave() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Wei amounts come in as decimal strings, TOML integers cannot hold them
fn deserialize_wei<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    s.parse::<U256>().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Key prefix shared with the pool frontend
    pub coin: String,
    pub redis: RedisConfig,
    pub rpc: EthRpcConfig,
    pub unlocker: UnlockerConfig,
    pub payouts: PayoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("UNLOCKER").separator("_"))
            .build()?
            .try_deserialize()
    }

    pub fn with_redis_url(mut self, url: String) -> Self {
        self.redis.url = url;
        self
    }

    pub fn with_rpc_url(mut self, url: String) -> Self {
        self.rpc.url = url;
        self
    }

    pub fn with_depth(mut self, depth: u64) -> Self {
        self.unlocker.depth = depth;
        self
    }

    pub fn with_threshold(mut self, threshold: U256) -> Self {
        self.payouts.threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const EXAMPLE: &str = r#"
coin = "cpu"

[redis]
url = "redis://127.0.0.1:6379/0"

[rpc]
url = "http://127.0.0.1:8545"
timeout_secs = 30

[unlocker]
pool_fee = 1
pool_fee_address = "0x00000000000000000000000000000000000000fe"
depth = 16
immature_depth = 8

[payouts]
address = "0x00000000000000000000000000000000000000aa"
threshold = "100000000000000000"
"#;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_parses_full_config() {
        let config = parse(EXAMPLE);

        assert_eq!(config.coin, "cpu");
        assert_eq!(config.unlocker.pool_fee, 1);
        assert_eq!(config.unlocker.depth, 16);
        assert_eq!(
            config.payouts.threshold,
            U256::from(100_000_000_000_000_000u64)
        );
        assert!(config.payouts.bgsave);
    }

    #[test]
    fn test_defaults_fill_omitted_fields() {
        let minimal = r#"
coin = "eth"

[redis]
url = "redis://localhost"

[rpc]
url = "http://localhost:8545"
timeout_secs = 10

[unlocker]

[payouts]
"#;
        let config = parse(minimal);

        assert_eq!(config.unlocker.pool_fee, 0);
        assert_eq!(config.unlocker.depth, 120);
        assert_eq!(config.unlocker.immature_depth, 40);
        assert_eq!(config.unlocker.window, 604_800);
        assert_eq!(config.unlocker.block_window, 5_000);
        assert_eq!(config.unlocker.interval_secs, 600);
        assert_eq!(config.payouts.threshold, U256::ZERO);
        assert!(config.payouts.address.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_builders_override_fields() {
        let config = parse(EXAMPLE)
            .with_depth(32)
            .with_threshold(U256::from(1u64));

        assert_eq!(config.unlocker.depth, 32);
        assert_eq!(config.payouts.threshold, U256::from(1u64));
    }
}
