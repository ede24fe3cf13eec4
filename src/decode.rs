//! Decoding of raw logs into [`DecodedLogArgs`].

use alloy::{primitives::Address, sol_types::SolEventInterface};

use crate::{
    Chain,
    abi::{
        erc20::IERC20::IERC20Events, ether_token::IEtherToken::IEtherTokenEvents,
        exchange::IExchange::IExchangeEvents,
    },
    types::{DecodedLogArgs, DecodedLogEvent, LogEvent},
};

/// Decodes logs of the contracts of a particular [`Chain`].
///
/// Exchange events are accepted only from the chain's exchange and wrapped
/// ether events only from the chain's ether token, ERC-20 events from any
/// address. Everything else decodes to `None`.
#[derive(Clone, Copy, Debug)]
pub struct LogDecoder {
    exchange: Address,
    ether_token: Address,
}

impl LogDecoder {
    pub fn new(chain: &Chain) -> Self {
        Self {
            exchange: chain.exchange(),
            ether_token: chain.ether_token(),
        }
    }

    pub fn decode(&self, event: &LogEvent) -> Option<DecodedLogEvent<DecodedLogArgs>> {
        let log = event.log.inner();

        let args = if log.address == self.exchange {
            match IExchangeEvents::decode_log(&log).ok()?.data {
                IExchangeEvents::LogFill(e) => DecodedLogArgs::Fill {
                    order_hash: e.orderHash,
                    maker: e.maker,
                    taker: e.taker,
                    fee_recipient: e.feeRecipient,
                    filled_maker_token_amount: e.filledMakerTokenAmount,
                    filled_taker_token_amount: e.filledTakerTokenAmount,
                    paid_maker_fee: e.paidMakerFee,
                    paid_taker_fee: e.paidTakerFee,
                },
                IExchangeEvents::LogCancel(e) => DecodedLogArgs::Cancel {
                    order_hash: e.orderHash,
                    maker: e.maker,
                    fee_recipient: e.feeRecipient,
                    cancelled_maker_token_amount: e.cancelledMakerTokenAmount,
                    cancelled_taker_token_amount: e.cancelledTakerTokenAmount,
                },
                IExchangeEvents::LogError(e) => DecodedLogArgs::Error {
                    order_hash: e.orderHash,
                    error_id: e.errorId,
                },
            }
        } else if let Some(args) = self.decode_ether_token(&log) {
            args
        } else {
            match IERC20Events::decode_log(&log).ok()?.data {
                IERC20Events::Transfer(e) => DecodedLogArgs::Transfer {
                    from: e.from,
                    to: e.to,
                    value: e.value,
                },
                IERC20Events::Approval(e) => DecodedLogArgs::Approval {
                    owner: e.owner,
                    spender: e.spender,
                    value: e.value,
                },
            }
        };

        Some(DecodedLogEvent::new(event, args))
    }

    fn decode_ether_token(&self, log: &alloy::primitives::Log) -> Option<DecodedLogArgs> {
        if log.address != self.ether_token {
            return None;
        }
        match IEtherTokenEvents::decode_log(log).ok()?.data {
            IEtherTokenEvents::Deposit(e) => Some(DecodedLogArgs::Deposit {
                owner: e.owner,
                value: e.value,
            }),
            IEtherTokenEvents::Withdrawal(e) => Some(DecodedLogArgs::Withdrawal {
                owner: e.owner,
                value: e.value,
            }),
        }
    }
}
