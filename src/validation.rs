//! Off-chain prediction of the exchange contract's fill and cancel checks.
//!
//! [`OrderValidator`] holds the rules themselves and works on data the caller
//! already has: the order, the amount the exchange considers unavailable
//! (filled plus cancelled) and a [`TransferSimulator`] for balance checks.
//! [`OrderValidationUtils`] fetches that data from a [`ChainState`] and adds
//! the batch variants of the checks.

use alloy::primitives::{Address, U256};
use itertools::Itertools;
use tracing::debug;

use crate::{
    Chain,
    chain::ChainState,
    error::{DexError, ExchangeContractError, ProviderError},
    simulation::TransferSimulator,
    types::{Order, OrderHash, SignedOrder, TradeSide, TransferType},
};

/// Scale the relative rounding error is expressed in.
pub const ROUNDING_ERROR_PRECISION: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

/// Largest acceptable relative rounding error, in [`ROUNDING_ERROR_PRECISION`]
/// units (0.1%).
pub const ROUNDING_ERROR_THRESHOLD: U256 = U256::from_limbs([1_000, 0, 0, 0]);

/// Indicates if `floor(numerator * target / denominator)` loses more than
/// 0.1% of the exact value, as computed by the exchange contract.
///
/// Overflow and division by zero revert on-chain and count as an error here.
pub fn is_rounding_error(numerator: U256, denominator: U256, target: U256) -> bool {
    if denominator.is_zero() {
        return true;
    }
    let remainder = target.mul_mod(numerator, denominator);
    if remainder.is_zero() {
        return false;
    }
    let (Some(scaled), Some(product)) = (
        remainder.checked_mul(ROUNDING_ERROR_PRECISION),
        numerator.checked_mul(target),
    ) else {
        return true;
    };
    // Non-zero remainder implies non-zero numerator and target
    scaled / product > ROUNDING_ERROR_THRESHOLD
}

/// `floor(numerator * target / denominator)`, `None` where the exchange
/// contract would revert.
pub fn partial_amount(numerator: U256, denominator: U256, target: U256) -> Option<U256> {
    numerator.checked_mul(target)?.checked_div(denominator)
}

/// Signed order along with the taker token amount to fill it for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderFillRequest {
    pub signed_order: SignedOrder,
    pub taker_token_fill_amount: U256,
}

/// Order along with the taker token amount to cancel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderCancellationRequest {
    pub order: Order,
    pub taker_token_cancel_amount: U256,
}

/// Exchange contract rules evaluated at a fixed point in time.
#[derive(Clone, Copy, Debug)]
pub struct OrderValidator {
    fee_token: Address,
    now: u64,
}

impl OrderValidator {
    /// `now` is the unix timestamp, in seconds, expiration is checked against.
    pub fn new(fee_token: Address, now: u64) -> Self {
        Self { fee_token, now }
    }

    /// Checks that some of the order is left to fill and it is not expired.
    pub fn validate_fillable_or_throw(
        &self,
        order: &Order,
        unavailable: U256,
    ) -> Result<(), ExchangeContractError> {
        if remaining(order, unavailable).is_zero() {
            return Err(ExchangeContractError::OrderRemainingFillAmountZero);
        }
        if order.is_expired_at(self.now) {
            return Err(ExchangeContractError::OrderFillExpired);
        }
        Ok(())
    }

    /// Checks that `taker` filling the order for `fill_amount` of taker token
    /// would succeed, including the token transfers, which are applied to
    /// the simulator.
    ///
    /// Returns the amount that would actually be filled, which is at most
    /// what remains of the order.
    pub async fn validate_fill_or_throw<S: ChainState>(
        &self,
        simulator: &mut TransferSimulator<'_, S>,
        signed_order: &SignedOrder,
        fill_amount: U256,
        taker: Address,
        unavailable: U256,
    ) -> Result<U256, DexError> {
        if fill_amount.is_zero() {
            return Err(ExchangeContractError::OrderFillAmountZero.into());
        }
        if !signed_order.is_valid_signature() {
            return Err(ExchangeContractError::InvalidSignature.into());
        }
        let remaining = remaining(signed_order, unavailable);
        if remaining.is_zero() {
            return Err(ExchangeContractError::OrderRemainingFillAmountZero.into());
        }
        if !signed_order.is_open() && signed_order.taker != taker {
            return Err(ExchangeContractError::TransactionSenderIsNotFillOrderTaker.into());
        }
        if signed_order.is_expired_at(self.now) {
            return Err(ExchangeContractError::OrderFillExpired.into());
        }

        let fill_amount = fill_amount.min(remaining);
        if is_rounding_error(
            fill_amount,
            signed_order.taker_token_amount,
            signed_order.maker_token_amount,
        ) {
            return Err(ExchangeContractError::OrderFillRoundingError.into());
        }

        self.validate_fill_order_balances_allowances_or_throw(
            simulator,
            signed_order,
            fill_amount,
            taker,
        )
        .await?;
        Ok(fill_amount)
    }

    /// Same as [`Self::validate_fill_or_throw`], but also fails if less than
    /// `fill_amount` would be filled.
    pub async fn validate_fill_or_kill_or_throw<S: ChainState>(
        &self,
        simulator: &mut TransferSimulator<'_, S>,
        signed_order: &SignedOrder,
        fill_amount: U256,
        taker: Address,
        unavailable: U256,
    ) -> Result<(), DexError> {
        let filled = self
            .validate_fill_or_throw(simulator, signed_order, fill_amount, taker, unavailable)
            .await?;
        if filled != fill_amount {
            return Err(ExchangeContractError::InsufficientRemainingFillAmount.into());
        }
        Ok(())
    }

    /// Checks that cancelling `cancel_amount` of taker token would succeed.
    ///
    /// Returns the amount that would actually be cancelled.
    pub fn validate_cancel_or_throw(
        &self,
        order: &Order,
        cancel_amount: U256,
        unavailable: U256,
    ) -> Result<U256, ExchangeContractError> {
        if cancel_amount.is_zero() {
            return Err(ExchangeContractError::OrderCancelAmountZero);
        }
        if order.is_expired_at(self.now) {
            return Err(ExchangeContractError::OrderCancelExpired);
        }
        let remaining = remaining(order, unavailable);
        if remaining.is_zero() {
            return Err(ExchangeContractError::OrderAlreadyCancelledOrFilled);
        }
        Ok(cancel_amount.min(remaining))
    }

    /// Replays the transfers settlement performs for a fill of `fill_amount`
    /// taker token, in the order the exchange performs them.
    pub async fn validate_fill_order_balances_allowances_or_throw<S: ChainState>(
        &self,
        simulator: &mut TransferSimulator<'_, S>,
        order: &Order,
        fill_amount: U256,
        taker: Address,
    ) -> Result<(), DexError> {
        let proportional = |component: U256| {
            partial_amount(fill_amount, order.taker_token_amount, component)
                .ok_or(ExchangeContractError::OrderFillRoundingError)
        };
        let maker_amount = proportional(order.maker_token_amount)?;
        let maker_fee = proportional(order.maker_fee)?;
        let taker_fee = proportional(order.taker_fee)?;

        simulator
            .transfer_from(
                order.maker_token_address,
                order.maker,
                taker,
                maker_amount,
                TradeSide::Maker,
                TransferType::Trade,
            )
            .await?;
        simulator
            .transfer_from(
                order.taker_token_address,
                taker,
                order.maker,
                fill_amount,
                TradeSide::Taker,
                TransferType::Trade,
            )
            .await?;
        simulator
            .transfer_from(
                self.fee_token,
                order.maker,
                order.fee_recipient,
                maker_fee,
                TradeSide::Maker,
                TransferType::Fee,
            )
            .await?;
        simulator
            .transfer_from(
                self.fee_token,
                taker,
                order.fee_recipient,
                taker_fee,
                TradeSide::Taker,
                TransferType::Fee,
            )
            .await?;
        Ok(())
    }
}

fn remaining(order: &Order, unavailable: U256) -> U256 {
    order.taker_token_amount.saturating_sub(unavailable)
}

/// Runs [`OrderValidator`] checks against the current chain state.
///
/// Every call builds a fresh [`TransferSimulator`], batch calls share one
/// across all items so later items observe the transfers of earlier ones.
#[derive(Debug)]
pub struct OrderValidationUtils<'s, S> {
    state: &'s S,
    exchange: Address,
    token_transfer_proxy: Address,
    fee_token: Address,
}

impl<'s, S: ChainState> OrderValidationUtils<'s, S> {
    pub fn new(chain: &Chain, state: &'s S) -> Self {
        Self {
            state,
            exchange: chain.exchange(),
            token_transfer_proxy: chain.token_transfer_proxy(),
            fee_token: chain.fee_token(),
        }
    }

    /// Filled plus cancelled taker token amount of the order.
    pub async fn unavailable_taker_amount(
        &self,
        order_hash: OrderHash,
    ) -> Result<U256, ProviderError> {
        let (filled, cancelled) = futures::try_join!(
            self.state.filled_taker_amount(self.exchange, order_hash),
            self.state.cancelled_taker_amount(self.exchange, order_hash),
        )?;
        Ok(filled.saturating_add(cancelled))
    }

    /// Validator bound to the timestamp of the latest block.
    pub async fn validator(&self) -> Result<OrderValidator, ProviderError> {
        let now = self.state.block_timestamp().await?;
        Ok(OrderValidator::new(self.fee_token, now))
    }

    fn simulator(&self) -> TransferSimulator<'s, S> {
        TransferSimulator::new(self.state, self.token_transfer_proxy)
    }

    pub async fn validate_fillable(&self, signed_order: &SignedOrder) -> Result<(), DexError> {
        let validator = self.validator().await?;
        let unavailable = self.unavailable_taker_amount(signed_order.hash()).await?;
        Ok(validator.validate_fillable_or_throw(signed_order, unavailable)?)
    }

    /// See [`OrderValidator::validate_fill_or_throw`].
    pub async fn validate_fill(
        &self,
        signed_order: &SignedOrder,
        fill_amount: U256,
        taker: Address,
    ) -> Result<U256, DexError> {
        let validator = self.validator().await?;
        let unavailable = self.unavailable_taker_amount(signed_order.hash()).await?;
        validator
            .validate_fill_or_throw(
                &mut self.simulator(),
                signed_order,
                fill_amount,
                taker,
                unavailable,
            )
            .await
    }

    pub async fn validate_fill_or_kill(
        &self,
        signed_order: &SignedOrder,
        fill_amount: U256,
        taker: Address,
    ) -> Result<(), DexError> {
        let validator = self.validator().await?;
        let unavailable = self.unavailable_taker_amount(signed_order.hash()).await?;
        validator
            .validate_fill_or_kill_or_throw(
                &mut self.simulator(),
                signed_order,
                fill_amount,
                taker,
                unavailable,
            )
            .await
    }

    /// See [`OrderValidator::validate_cancel_or_throw`].
    pub async fn validate_cancel(
        &self,
        order: &Order,
        cancel_amount: U256,
    ) -> Result<U256, DexError> {
        let validator = self.validator().await?;
        let unavailable = self.unavailable_taker_amount(order.hash()).await?;
        Ok(validator.validate_cancel_or_throw(order, cancel_amount, unavailable)?)
    }

    /// Validates fills of all orders by the same taker in one transaction.
    /// Returns the amounts that would be filled, in request order.
    pub async fn validate_batch_fill(
        &self,
        requests: &[OrderFillRequest],
        taker: Address,
    ) -> Result<Vec<U256>, DexError> {
        if requests.is_empty() {
            return Err(ExchangeContractError::BatchOrdersMustHaveAtLeastOneItem.into());
        }
        let validator = self.validator().await?;
        let mut simulator = self.simulator();
        let mut filled = Vec::with_capacity(requests.len());
        for request in requests {
            let unavailable = self
                .unavailable_taker_amount(request.signed_order.hash())
                .await?;
            filled.push(
                validator
                    .validate_fill_or_throw(
                        &mut simulator,
                        &request.signed_order,
                        request.taker_token_fill_amount,
                        taker,
                        unavailable,
                    )
                    .await?,
            );
        }
        Ok(filled)
    }

    pub async fn validate_batch_fill_or_kill(
        &self,
        requests: &[OrderFillRequest],
        taker: Address,
    ) -> Result<(), DexError> {
        if requests.is_empty() {
            return Err(ExchangeContractError::BatchOrdersMustHaveAtLeastOneItem.into());
        }
        let validator = self.validator().await?;
        let mut simulator = self.simulator();
        for request in requests {
            let unavailable = self
                .unavailable_taker_amount(request.signed_order.hash())
                .await?;
            validator
                .validate_fill_or_kill_or_throw(
                    &mut simulator,
                    &request.signed_order,
                    request.taker_token_fill_amount,
                    taker,
                    unavailable,
                )
                .await?;
        }
        Ok(())
    }

    /// Validates cancellation of orders of a single maker in one transaction.
    /// Returns the amounts that would be cancelled, in request order.
    pub async fn validate_batch_cancel(
        &self,
        requests: &[OrderCancellationRequest],
    ) -> Result<Vec<U256>, DexError> {
        if requests.is_empty() {
            return Err(ExchangeContractError::BatchOrdersMustHaveAtLeastOneItem.into());
        }
        if !requests.iter().map(|request| request.order.maker).all_equal() {
            return Err(ExchangeContractError::MultipleMakersInSingleCancelBatchDisallowed.into());
        }
        let validator = self.validator().await?;
        let mut cancelled = Vec::with_capacity(requests.len());
        for request in requests {
            let unavailable = self.unavailable_taker_amount(request.order.hash()).await?;
            cancelled.push(validator.validate_cancel_or_throw(
                &request.order,
                request.taker_token_cancel_amount,
                unavailable,
            )?);
        }
        Ok(cancelled)
    }

    /// Validates filling the orders one after another until `fill_amount` of
    /// taker token is filled. Returns the total that would be filled, which
    /// is less than `fill_amount` if the orders do not cover it.
    pub async fn validate_fill_up_to(
        &self,
        signed_orders: &[SignedOrder],
        fill_amount: U256,
        taker: Address,
    ) -> Result<U256, DexError> {
        if signed_orders.is_empty() {
            return Err(ExchangeContractError::BatchOrdersMustHaveAtLeastOneItem.into());
        }
        let validator = self.validator().await?;
        let mut simulator = self.simulator();
        let mut filled = U256::ZERO;
        for signed_order in signed_orders {
            let left = fill_amount - filled;
            if left.is_zero() {
                break;
            }
            let unavailable = self.unavailable_taker_amount(signed_order.hash()).await?;
            filled += validator
                .validate_fill_or_throw(&mut simulator, signed_order, left, taker, unavailable)
                .await?;
        }
        debug!(%fill_amount, %filled, orders = signed_orders.len(), "Validated fill up to");
        Ok(filled)
    }
}
