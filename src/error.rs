use std::fmt::{self, Display};

use alloy::{contract, sol_types, transports};

use crate::types::{TradeSide, TransferType};

/// Error returned by the RPC provider as a result of a chain read.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,
}

impl From<contract::Error> for ProviderError {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            contract::Error::PendingTransactionError(err) => Self::Transport(err.to_string()),
            _ => Self::Fatal(value.to_string()),
        }
    }
}

impl<E: Display> From<transports::RpcError<E>> for ProviderError {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                let msg = resp.message.to_ascii_lowercase();
                if (resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found"))
                {
                    Self::InvalidRequest(msg)
                } else if resp.code == 3 && msg.contains("reverted") {
                    Self::Reverted(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl From<sol_types::Error> for ProviderError {
    fn from(value: sol_types::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

/// Reason the settlement contract would reject a fill or cancel, as
/// predicted off-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ExchangeContractError {
    #[error("order fill expired")]
    OrderFillExpired,

    #[error("order cancel expired")]
    OrderCancelExpired,

    #[error("order remaining fill amount is zero")]
    OrderRemainingFillAmountZero,

    #[error("order fill rounding error")]
    OrderFillRoundingError,

    #[error("order fill amount is zero")]
    OrderFillAmountZero,

    #[error("order cancel amount is zero")]
    OrderCancelAmountZero,

    #[error("order already cancelled or filled")]
    OrderAlreadyCancelledOrFilled,

    #[error("insufficient remaining fill amount")]
    InsufficientRemainingFillAmount,

    #[error("transaction sender is not the fill order taker")]
    TransactionSenderIsNotFillOrderTaker,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("multiple makers in a single cancel batch are disallowed")]
    MultipleMakersInSingleCancelBatchDisallowed,

    #[error("batch orders must have at least one item")]
    BatchOrdersMustHaveAtLeastOneItem,

    #[error("insufficient {} balance", Leg(.side, .transfer_type))]
    InsufficientBalance {
        side: TradeSide,
        transfer_type: TransferType,
    },

    #[error("insufficient {} allowance", Leg(.side, .transfer_type))]
    InsufficientAllowance {
        side: TradeSide,
        transfer_type: TransferType,
    },
}

/// Renders "maker", "taker fee" and so on.
struct Leg<'a>(&'a TradeSide, &'a TransferType);

impl Display for Leg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.0 {
            TradeSide::Maker => "maker",
            TradeSide::Taker => "taker",
        };
        match self.1 {
            TransferType::Trade => f.write_str(side),
            TransferType::Fee => write!(f, "{side} fee"),
        }
    }
}

/// Crate-wide error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DexError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("exchange contract error: {0}")]
    Contract(#[from] ExchangeContractError),

    #[error("subscription already present")]
    SubscriptionAlreadyPresent,

    #[error("subscription not found")]
    SubscriptionNotFound,
}

impl DexError {
    /// Validation failure kind, if this is one.
    pub fn contract_error(&self) -> Option<ExchangeContractError> {
        match self {
            Self::Contract(err) => Some(*err),
            _ => None,
        }
    }
}

impl From<contract::Error> for DexError {
    fn from(value: contract::Error) -> Self {
        Self::Provider(value.into())
    }
}

impl<E: Display> From<transports::RpcError<E>> for DexError {
    fn from(value: transports::RpcError<E>) -> Self {
        Self::Provider(value.into())
    }
}
