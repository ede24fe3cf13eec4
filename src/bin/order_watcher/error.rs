//! Error types for the order watcher.

use dex_order_sdk::error::DexError;

use crate::config::ConfigError;

/// Main error type for the order watcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("DEX SDK error: {0}")]
    Dex(#[from] DexError),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] alloy::primitives::hex::FromHexError),

    #[error("Failed to read orders: {0}")]
    OrdersFile(#[from] std::io::Error),

    #[error("Invalid orders file: {0}")]
    OrdersFormat(#[from] serde_json::Error),

    #[error("No orders to watch")]
    NoOrders,
}

pub type Result<T> = std::result::Result<T, Error>;
