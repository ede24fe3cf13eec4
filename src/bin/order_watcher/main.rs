//! Order watcher for the DEX.
//!
//! This binary loads a set of signed orders and logs every change of their
//! fillability until interrupted.

mod config;
mod error;

use std::{fs, path::Path, process::exit};

use alloy::providers::{DynProvider, ProviderBuilder};
use clap::Parser;
use dex_order_sdk::{
    chain::ProviderState,
    error::DexError,
    num::Converter,
    state::OrderState,
    types::SignedOrder,
    watcher::{OrderStateWatcher, WatcherConfig},
};
use fastnum::UD256;
use tracing::{error, info, warn};
use url::Url;

use config::{CliConfig, EnvConfig};
use error::{Error, Result};

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    let watcher_config = match cli_config.to_watcher_config(&env_config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(&env_config, &cli_config, watcher_config).await {
        error!(%e, "Order watcher encountered an error, shutting down");
        exit(1);
    }
}

async fn run(env_config: &EnvConfig, cli_config: &CliConfig, config: WatcherConfig) -> Result<()> {
    let chain = env_config.chain()?;
    let node_url = Url::parse(&env_config.node_rpc_url)?;
    let orders = load_orders(&cli_config.orders)?;

    info!(
        chain_id = chain.chain_id(),
        exchange = %chain.exchange(),
        orders = orders.len(),
        poll_interval = ?config.poll_interval(),
        "Starting order watcher"
    );

    let provider = DynProvider::new(ProviderBuilder::new().connect_http(node_url));
    let watcher = OrderStateWatcher::new(&chain, ProviderState::new(provider), config);

    for signed_order in orders {
        let maker = signed_order.maker;
        match watcher.add_order(signed_order) {
            Ok(order_hash) => info!(%order_hash, %maker, "Watching order"),
            Err(e) => warn!(%maker, %e, "Skipping order"),
        }
    }
    if watcher.is_empty() {
        return Err(Error::NoOrders);
    }

    let converter = Converter::new(cli_config.decimals);
    watcher.subscribe(move |result| log_order_state(&converter, result))?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for interrupt");
    }
    watcher.unsubscribe()?;
    info!("Order watcher stopped");
    Ok(())
}

fn load_orders(path: &Path) -> Result<Vec<SignedOrder>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn log_order_state(converter: &Converter, result: std::result::Result<OrderState, DexError>) {
    match result {
        Ok(OrderState::Valid {
            order_hash,
            relevant_state,
        }) => {
            let fillable_maker = converter
                .to_unit_amount::<4>(relevant_state.remaining_fillable_maker_token_amount)
                .unwrap_or(UD256::ZERO);
            let fillable_taker = converter
                .to_unit_amount::<4>(relevant_state.remaining_fillable_taker_token_amount)
                .unwrap_or(UD256::ZERO);
            info!(
                %order_hash,
                %fillable_maker,
                %fillable_taker,
                "Order is fillable"
            );
        }
        Ok(OrderState::Invalid { order_hash, error }) => {
            info!(%order_hash, %error, "Order is not fillable");
        }
        Err(e) => warn!(%e, "Failed to refresh order states"),
    }
}
