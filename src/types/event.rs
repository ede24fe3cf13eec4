use alloy::{
    primitives::{self, Address, B256, Bytes, TxHash, U256},
    rpc::types,
};

use super::OrderHash;

/// Log entry as returned by the node, compared structurally when
/// polled snapshots are diffed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub tx_index: Option<u64>,
    pub log_index: Option<u64>,
}

impl RawLog {
    /// Log payload in the form `sol!` event decoders accept.
    pub fn inner(&self) -> primitives::Log {
        primitives::Log::new_unchecked(self.address, self.topics.clone(), self.data.clone())
    }
}

impl From<&types::Log> for RawLog {
    fn from(log: &types::Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_hash: log.block_hash,
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            tx_index: log.transaction_index,
            log_index: log.log_index,
        }
    }
}

/// Raw log tagged with whether it appeared or disappeared since the
/// previous poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub is_removed: bool,
    pub log: RawLog,
}

impl LogEvent {
    pub fn added(log: RawLog) -> Self {
        Self {
            is_removed: false,
            log,
        }
    }

    pub fn removed(log: RawLog) -> Self {
        Self {
            is_removed: true,
            log,
        }
    }
}

/// Arguments of every event the order state depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedLogArgs {
    Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
    Approval {
        owner: Address,
        spender: Address,
        value: U256,
    },
    Deposit {
        owner: Address,
        value: U256,
    },
    Withdrawal {
        owner: Address,
        value: U256,
    },
    Fill {
        order_hash: OrderHash,
        maker: Address,
        taker: Address,
        fee_recipient: Address,
        filled_maker_token_amount: U256,
        filled_taker_token_amount: U256,
        paid_maker_fee: U256,
        paid_taker_fee: U256,
    },
    Cancel {
        order_hash: OrderHash,
        maker: Address,
        fee_recipient: Address,
        cancelled_maker_token_amount: U256,
        cancelled_taker_token_amount: U256,
    },
    /// Exchange refused a fill or cancel without reverting.
    Error { order_hash: OrderHash, error_id: u8 },
}

impl DecodedLogArgs {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "Transfer",
            Self::Approval { .. } => "Approval",
            Self::Deposit { .. } => "Deposit",
            Self::Withdrawal { .. } => "Withdrawal",
            Self::Fill { .. } => "LogFill",
            Self::Cancel { .. } => "LogCancel",
            Self::Error { .. } => "LogError",
        }
    }
}

/// Decoded event along with its position in the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogContext<T> {
    /// Contract emitted the event.
    pub address: Address,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub tx_index: Option<u64>,
    pub log_index: Option<u64>,
    pub args: T,
}

/// Decoded log with the removal tag of the [`LogEvent`] it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedLogEvent<T> {
    pub is_removed: bool,
    pub log: LogContext<T>,
}

impl<T> DecodedLogEvent<T> {
    pub(crate) fn new(event: &LogEvent, args: T) -> Self {
        let raw = &event.log;
        Self {
            is_removed: event.is_removed,
            log: LogContext {
                address: raw.address,
                block_hash: raw.block_hash,
                block_number: raw.block_number,
                tx_hash: raw.tx_hash,
                tx_index: raw.tx_index,
                log_index: raw.log_index,
                args,
            },
        }
    }

    pub fn args(&self) -> &T {
        &self.log.args
    }
}
