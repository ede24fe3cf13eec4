mod event;
mod order;

pub use event::*;
pub use order::{ECSignature, Order, SignedOrder};

use alloy::primitives::{Address, B256, U256};

/// Content address of an order, see [`Order::hash`].
pub type OrderHash = B256;

/// Address meaning "nobody": an open order taker or a missing fee recipient.
pub const NULL_ADDRESS: Address = Address::ZERO;

/// Allowance value tokens treat as infinite, transfers never decrement it.
pub const UNLIMITED_ALLOWANCE: U256 = U256::MAX;

/// Party of the trade a token transfer is taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TradeSide {
    Maker,
    Taker,
}

/// Purpose of a token transfer within a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferType {
    Trade,
    Fee,
}
