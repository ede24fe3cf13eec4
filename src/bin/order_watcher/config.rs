//! Configuration for the order watcher.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): node and contract addresses
//! - CLI arguments: orders to watch and polling parameters

use std::{path::PathBuf, time::Duration};

use alloy::primitives::{Address, hex::FromHexError};
use clap::Parser;
use dex_order_sdk::{
    Chain,
    watcher::{DEFAULT_POLL_INTERVAL, WatcherConfig},
};

/// Environment configuration (connection details, deployment addresses).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// RPC URL for the node
    pub node_rpc_url: String,

    /// Chain ID (e.g., 1 for mainnet)
    pub chain_id: u64,

    /// Exchange contract address
    pub exchange_address: String,

    /// Token transfer proxy address, the spender makers approve
    pub token_transfer_proxy_address: String,

    /// Fee token address
    pub fee_token_address: String,

    /// Wrapped ether token address
    pub ether_token_address: String,

    /// Optional poll interval (default: 10s)
    pub poll_interval_ms: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Parse the deployment addresses into a chain descriptor.
    pub fn chain(&self) -> Result<Chain, FromHexError> {
        Ok(Chain::custom(
            self.chain_id,
            self.exchange_address.parse()?,
            self.token_transfer_proxy_address.parse::<Address>()?,
            self.fee_token_address.parse()?,
            self.ether_token_address.parse()?,
        ))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis)
    }
}

/// CLI arguments of the order watcher.
#[derive(Debug, Parser)]
#[command(name = "order-watcher")]
#[command(about = "Watches signed orders and logs their fillability changes")]
pub struct CliConfig {
    /// JSON file with an array of signed orders
    #[arg(long)]
    pub orders: PathBuf,

    /// Number of most recent blocks re-queried on every poll
    #[arg(long, default_value = "5")]
    pub reorg_window: u64,

    /// Number of blocks behind the head to stay
    #[arg(long, default_value = "0")]
    pub confirmations: u64,

    /// Decimals used to display token amounts
    #[arg(long, default_value = "18")]
    pub decimals: u8,
}

impl CliConfig {
    /// Combine CLI and environment settings into the watcher configuration.
    pub fn to_watcher_config(&self, env: &EnvConfig) -> Result<WatcherConfig, ConfigError> {
        if self.reorg_window == 0 {
            return Err(ConfigError::ZeroReorgWindow);
        }
        let poll_interval = env.poll_interval();
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(WatcherConfig::default()
            .with_poll_interval(poll_interval)
            .with_reorg_window(self.reorg_window)
            .with_confirmations(self.confirmations))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reorg_window must be at least one block")]
    ZeroReorgWindow,

    #[error("poll interval cannot be zero")]
    ZeroPollInterval,
}
