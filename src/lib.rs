//! Order DEX SDK.
//!
//! # Overview
//!
//! Client-side tooling for an exchange that settles off-chain signed orders
//! on-chain through a token transfer proxy.
//!
//! Use [`types::SignedOrder::sign`] to produce orders, [`validation`] to predict
//! whether a fill or cancel would succeed before sending a transaction, and
//! [`watcher::OrderStateWatcher`] to track the fillability of a set of orders
//! as the chain moves.
//!
//! Chain access goes through the [`chain::ChainState`] capability, which is
//! implemented for any `alloy` provider by [`chain::ProviderState`].
//!
//! # Limitations/follow-ups
//!
//! * Event tracking relies on log polling over a trailing block window,
//!   reorgs deeper than the window are not reported as removed logs.
//!
//! * Only the maker side of an order is tracked, taker funds are checked
//!   only by explicit fill validation.
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory chain that implements
//! [`chain::ChainState`] along with signed order fixtures.

pub mod abi;
pub mod chain;
pub mod decode;
pub mod error;
pub mod num;
pub mod simulation;
pub mod state;
pub mod stream;
pub mod testing;
pub mod types;
pub mod validation;
pub mod watcher;

use alloy::primitives::{Address, address};

#[derive(Clone, Debug)]
/// Chain the exchange is operating on.
pub struct Chain {
    chain_id: u64,
    exchange: Address,
    token_transfer_proxy: Address,
    fee_token: Address,
    ether_token: Address,
}

impl Chain {
    pub fn mainnet() -> Self {
        Self {
            chain_id: 1,
            exchange: address!("0x12459c951127e0c374ff9105dda097662a027093"),
            token_transfer_proxy: address!("0x8da0d80f5007ef1e431dd2127178d224e32c2ef4"),
            fee_token: address!("0xe41d2489571d322189246dafa5ebde1f4699f498"),
            ether_token: address!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
        }
    }

    pub fn custom(
        chain_id: u64,
        exchange: Address,
        token_transfer_proxy: Address,
        fee_token: Address,
        ether_token: Address,
    ) -> Self {
        Self {
            chain_id,
            exchange,
            token_transfer_proxy,
            fee_token,
            ether_token,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Settlement contract orders are filled and cancelled against.
    pub fn exchange(&self) -> Address {
        self.exchange
    }

    /// Spender the maker and taker have to approve for the exchange
    /// to move their tokens.
    pub fn token_transfer_proxy(&self) -> Address {
        self.token_transfer_proxy
    }

    /// Token maker and taker fees are paid in.
    pub fn fee_token(&self) -> Address {
        self.fee_token
    }

    /// Wrapped ether token, its deposits and withdrawals change balances
    /// without `Transfer` events.
    pub fn ether_token(&self) -> Address {
        self.ether_token
    }
}
