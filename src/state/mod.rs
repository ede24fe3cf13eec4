//! Order state tracking.
//!
//! [`OrderStateUtils`] derives the [`OrderRelevantState`] of an order, i.e.
//! how much of it is still fillable given what was filled or cancelled and the
//! maker's funds, and turns it into an [`OrderState`] which is either valid or
//! carries the first exchange rule the order currently breaks.
//!
//! [`OrderStateIndex`] and [`ExpirationWatcher`] keep the set of watched
//! orders addressable by the events that can affect them.

mod expiration;
mod index;

use std::collections::HashMap;

use alloy::primitives::{Address, U256, U512};

use crate::{
    Chain,
    chain::ChainState,
    error::{ExchangeContractError, ProviderError},
    simulation::BalanceAndAllowanceLazyStore,
    types::{Order, OrderHash, SignedOrder, TradeSide, TransferType},
};

pub use expiration::*;
pub use index::*;

/// Orders whose remaining fillable taker amount is below
/// `taker_token_amount / maker_token_amount / MIN_FILLABLE_DIVISOR` can not
/// be filled without a rounding error.
const MIN_FILLABLE_DIVISOR: u64 = 1000;

/// Everything the fillability of an order depends on, as of one
/// chain state. Amounts in token base units.
#[derive(Clone, Copy, derive_more::Debug, PartialEq, Eq)]
pub struct OrderRelevantState {
    #[debug("{maker_balance}")]
    pub maker_balance: U256,
    #[debug("{maker_proxy_allowance}")]
    pub maker_proxy_allowance: U256,
    #[debug("{maker_fee_balance}")]
    pub maker_fee_balance: U256,
    #[debug("{maker_fee_proxy_allowance}")]
    pub maker_fee_proxy_allowance: U256,
    #[debug("{filled_taker_token_amount}")]
    pub filled_taker_token_amount: U256,
    #[debug("{cancelled_taker_token_amount}")]
    pub cancelled_taker_token_amount: U256,
    #[debug("{remaining_fillable_maker_token_amount}")]
    pub remaining_fillable_maker_token_amount: U256,
    #[debug("{remaining_fillable_taker_token_amount}")]
    pub remaining_fillable_taker_token_amount: U256,
}

/// State of a watched order delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderState {
    Valid {
        order_hash: OrderHash,
        relevant_state: OrderRelevantState,
    },
    Invalid {
        order_hash: OrderHash,
        error: ExchangeContractError,
    },
}

impl OrderState {
    pub fn order_hash(&self) -> OrderHash {
        match self {
            Self::Valid { order_hash, .. } | Self::Invalid { order_hash, .. } => *order_hash,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn error(&self) -> Option<ExchangeContractError> {
        match self {
            Self::Valid { .. } => None,
            Self::Invalid { error, .. } => Some(*error),
        }
    }
}

/// `floor(a * b / denominator)` without intermediate overflow, zero for a
/// zero denominator.
fn mul_div(a: U256, b: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::ZERO;
    }
    let product: U512 = a.widening_mul(b);
    U256::saturating_from(product / U512::from(denominator))
}

/// Computes how much of an order the maker can currently fund, taking maker
/// fees into account.
#[derive(Clone, Copy, Debug)]
pub struct RemainingFillableCalculator {
    maker_token_amount: U256,
    taker_token_amount: U256,
    maker_fee: U256,
    /// Maker token and fee are paid from the same balance.
    is_fee_pooled: bool,
    transferable_maker_token_amount: U256,
    transferable_maker_fee_amount: U256,
    remaining_maker_token_amount: U256,
}

impl RemainingFillableCalculator {
    /// Transferable amounts are the lesser of the maker's balance and proxy
    /// allowance of the respective token.
    pub fn new(
        order: &Order,
        fee_token: Address,
        transferable_maker_token_amount: U256,
        transferable_maker_fee_amount: U256,
        remaining_maker_token_amount: U256,
    ) -> Self {
        Self {
            maker_token_amount: order.maker_token_amount,
            taker_token_amount: order.taker_token_amount,
            maker_fee: order.maker_fee,
            is_fee_pooled: order.maker_token_address == fee_token,
            transferable_maker_token_amount,
            transferable_maker_fee_amount,
            remaining_maker_token_amount,
        }
    }

    pub fn remaining_maker_fillable(&self) -> U256 {
        if self.has_sufficient_funds() {
            return self.remaining_maker_token_amount;
        }
        if self.maker_fee.is_zero() {
            return self
                .remaining_maker_token_amount
                .min(self.transferable_maker_token_amount);
        }
        self.partially_fillable()
    }

    pub fn remaining_taker_fillable(&self) -> U256 {
        mul_div(
            self.remaining_maker_fillable(),
            self.taker_token_amount,
            self.maker_token_amount,
        )
    }

    fn remaining_fee(&self) -> U256 {
        mul_div(
            self.remaining_maker_token_amount,
            self.maker_fee,
            self.maker_token_amount,
        )
    }

    fn has_sufficient_funds(&self) -> bool {
        let remaining_fee = self.remaining_fee();
        if self.is_fee_pooled {
            self.transferable_maker_token_amount
                >= self.remaining_maker_token_amount.saturating_add(remaining_fee)
        } else {
            self.transferable_maker_token_amount >= self.remaining_maker_token_amount
                && self.transferable_maker_fee_amount >= remaining_fee
        }
    }

    fn partially_fillable(&self) -> U256 {
        let fundable = if self.is_fee_pooled {
            // Every unit filled takes its share of the fee out of the same pool
            mul_div(
                self.transferable_maker_token_amount,
                self.maker_token_amount,
                self.maker_token_amount.saturating_add(self.maker_fee),
            )
        } else {
            let fee = self.transferable_maker_fee_amount.min(self.remaining_fee());
            mul_div(fee, self.maker_token_amount, self.maker_fee)
                .min(self.transferable_maker_token_amount)
        };
        fundable.min(self.remaining_maker_token_amount)
    }
}

/// Checks the relevant state of an order for conditions under which any fill
/// of it would fail, most fundamental first.
pub fn validate_relevant_state(
    order: &Order,
    state: &OrderRelevantState,
    now_sec: u64,
) -> Result<(), ExchangeContractError> {
    if order.is_expired_at(now_sec) {
        return Err(ExchangeContractError::OrderFillExpired);
    }
    let unavailable = state
        .filled_taker_token_amount
        .saturating_add(state.cancelled_taker_token_amount);
    if order.taker_token_amount <= unavailable {
        return Err(ExchangeContractError::OrderRemainingFillAmountZero);
    }

    if state.maker_balance.is_zero() {
        return Err(ExchangeContractError::InsufficientBalance {
            side: TradeSide::Maker,
            transfer_type: TransferType::Trade,
        });
    }
    if state.maker_proxy_allowance.is_zero() {
        return Err(ExchangeContractError::InsufficientAllowance {
            side: TradeSide::Maker,
            transfer_type: TransferType::Trade,
        });
    }
    if !order.maker_fee.is_zero() {
        if state.maker_fee_balance.is_zero() {
            return Err(ExchangeContractError::InsufficientBalance {
                side: TradeSide::Maker,
                transfer_type: TransferType::Fee,
            });
        }
        if state.maker_fee_proxy_allowance.is_zero() {
            return Err(ExchangeContractError::InsufficientAllowance {
                side: TradeSide::Maker,
                transfer_type: TransferType::Fee,
            });
        }
    }

    let scaled: U512 = state
        .remaining_fillable_taker_token_amount
        .widening_mul(order.maker_token_amount);
    if scaled * U512::from(MIN_FILLABLE_DIVISOR) < U512::from(order.taker_token_amount) {
        return Err(ExchangeContractError::OrderFillRoundingError);
    }
    Ok(())
}

/// Computes order states against one view of the chain.
///
/// Balances, allowances and fill/cancel amounts are read once and reused for
/// every order evaluated by the same instance, so it should live no longer
/// than a single pass over the affected orders.
#[derive(Debug)]
pub struct OrderStateUtils<'s, S> {
    store: BalanceAndAllowanceLazyStore<'s, S>,
    exchange: Address,
    fee_token: Address,
    unavailable: HashMap<OrderHash, (U256, U256)>,
}

impl<'s, S: ChainState> OrderStateUtils<'s, S> {
    pub fn new(chain: &Chain, state: &'s S) -> Self {
        Self {
            store: BalanceAndAllowanceLazyStore::new(state, chain.token_transfer_proxy()),
            exchange: chain.exchange(),
            fee_token: chain.fee_token(),
            unavailable: HashMap::new(),
        }
    }

    /// Filled and cancelled taker token amounts of the order.
    async fn filled_and_cancelled(
        &mut self,
        order_hash: OrderHash,
    ) -> Result<(U256, U256), ProviderError> {
        if let Some(amounts) = self.unavailable.get(&order_hash) {
            return Ok(*amounts);
        }
        let state = self.store.chain_state();
        let amounts = futures::try_join!(
            state.filled_taker_amount(self.exchange, order_hash),
            state.cancelled_taker_amount(self.exchange, order_hash),
        )?;
        self.unavailable.insert(order_hash, amounts);
        Ok(amounts)
    }

    pub async fn relevant_state(
        &mut self,
        signed_order: &SignedOrder,
    ) -> Result<OrderRelevantState, ProviderError> {
        let order = &signed_order.order;
        let maker_balance = self
            .store
            .balance(order.maker_token_address, order.maker)
            .await?;
        let maker_proxy_allowance = self
            .store
            .proxy_allowance(order.maker_token_address, order.maker)
            .await?;
        let maker_fee_balance = self.store.balance(self.fee_token, order.maker).await?;
        let maker_fee_proxy_allowance = self
            .store
            .proxy_allowance(self.fee_token, order.maker)
            .await?;
        let (filled, cancelled) = self.filled_and_cancelled(signed_order.hash()).await?;

        let remaining_taker = order
            .taker_token_amount
            .saturating_sub(filled.saturating_add(cancelled));
        let remaining_maker = mul_div(
            remaining_taker,
            order.maker_token_amount,
            order.taker_token_amount,
        );
        let calculator = RemainingFillableCalculator::new(
            order,
            self.fee_token,
            maker_balance.min(maker_proxy_allowance),
            maker_fee_balance.min(maker_fee_proxy_allowance),
            remaining_maker,
        );

        Ok(OrderRelevantState {
            maker_balance,
            maker_proxy_allowance,
            maker_fee_balance,
            maker_fee_proxy_allowance,
            filled_taker_token_amount: filled,
            cancelled_taker_token_amount: cancelled,
            remaining_fillable_maker_token_amount: calculator.remaining_maker_fillable(),
            remaining_fillable_taker_token_amount: calculator.remaining_taker_fillable(),
        })
    }

    /// Relevant state of the order if it is fillable at `now_sec`, the
    /// reason it is not otherwise.
    pub async fn order_state(
        &mut self,
        signed_order: &SignedOrder,
        now_sec: u64,
    ) -> Result<OrderState, ProviderError> {
        let order_hash = signed_order.hash();
        let relevant_state = self.relevant_state(signed_order).await?;
        Ok(
            match validate_relevant_state(signed_order, &relevant_state, now_sec) {
                Ok(()) => OrderState::Valid {
                    order_hash,
                    relevant_state,
                },
                Err(error) => OrderState::Invalid { order_hash, error },
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeChain, GENESIS_TIMESTAMP, MAKER_TOKEN};

    fn funded(amount: u64) -> FakeChain {
        let chain = testing::chain();
        let fake = FakeChain::new();
        let maker = testing::maker_signer().address();
        for token in [MAKER_TOKEN, chain.fee_token()] {
            fake.fund(token, maker, chain.token_transfer_proxy(), U256::from(amount));
        }
        fake
    }

    fn calculator(
        order: &Order,
        transferable: u64,
        transferable_fee: u64,
    ) -> RemainingFillableCalculator {
        RemainingFillableCalculator::new(
            order,
            testing::chain().fee_token(),
            U256::from(transferable),
            U256::from(transferable_fee),
            order.maker_token_amount,
        )
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_price_ratio() {
        let fake = funded(100);
        let signed = testing::signed_order(U256::from(20), U256::from(10));
        fake.set_filled(signed.hash(), U256::from(2));
        let mut utils = OrderStateUtils::new(&testing::chain(), &fake);

        let state = utils.order_state(&signed, GENESIS_TIMESTAMP).await.unwrap();
        let OrderState::Valid { relevant_state, .. } = state else {
            panic!("expected valid state, got {state:?}");
        };
        assert_eq!(relevant_state.filled_taker_token_amount, U256::from(2));
        assert_eq!(
            relevant_state.remaining_fillable_maker_token_amount,
            U256::from(16)
        );
        assert_eq!(
            relevant_state.remaining_fillable_taker_token_amount,
            U256::from(8)
        );
    }

    #[tokio::test]
    async fn test_invalid_states() {
        let chain = testing::chain();
        let maker = testing::maker_signer().address();
        let signed = testing::signed_order(U256::from(20), U256::from(10));

        let fake = funded(100);
        fake.set_allowance(MAKER_TOKEN, maker, chain.token_transfer_proxy(), U256::ZERO);
        let state = OrderStateUtils::new(&chain, &fake)
            .order_state(&signed, GENESIS_TIMESTAMP)
            .await
            .unwrap();
        assert_eq!(
            state,
            OrderState::Invalid {
                order_hash: signed.hash(),
                error: ExchangeContractError::InsufficientAllowance {
                    side: TradeSide::Maker,
                    transfer_type: TransferType::Trade
                }
            }
        );

        let fake = funded(100);
        fake.set_cancelled(signed.hash(), U256::from(10));
        let state = OrderStateUtils::new(&chain, &fake)
            .order_state(&signed, GENESIS_TIMESTAMP)
            .await
            .unwrap();
        assert_eq!(
            state.error(),
            Some(ExchangeContractError::OrderRemainingFillAmountZero)
        );

        let state = OrderStateUtils::new(&chain, &funded(100))
            .order_state(&signed, testing::FAR_EXPIRATION)
            .await
            .unwrap();
        assert_eq!(state.error(), Some(ExchangeContractError::OrderFillExpired));
    }

    #[tokio::test]
    async fn test_missing_fee_funds() {
        let chain = testing::chain();
        let maker = testing::maker_signer().address();
        let mut order = testing::order(U256::from(20), U256::from(10));
        order.maker_fee = U256::from(1);
        let signed = SignedOrder::sign(order, &testing::maker_signer()).unwrap();

        let fake = funded(100);
        fake.set_balance(chain.fee_token(), maker, U256::ZERO);
        let state = OrderStateUtils::new(&chain, &fake)
            .order_state(&signed, GENESIS_TIMESTAMP)
            .await
            .unwrap();
        assert_eq!(
            state.error(),
            Some(ExchangeContractError::InsufficientBalance {
                side: TradeSide::Maker,
                transfer_type: TransferType::Fee
            })
        );
    }

    #[tokio::test]
    async fn test_dust_remainder_is_rounding_error() {
        let fake = funded(100);
        let signed = testing::signed_order(U256::from(1), U256::from(10_000));
        fake.set_filled(signed.hash(), U256::from(9_999));

        let state = OrderStateUtils::new(&testing::chain(), &fake)
            .order_state(&signed, GENESIS_TIMESTAMP)
            .await
            .unwrap();
        assert_eq!(
            state.error(),
            Some(ExchangeContractError::OrderFillRoundingError)
        );
    }

    #[tokio::test]
    async fn test_reads_are_shared_between_orders() {
        let fake = funded(100);
        let first = testing::signed_order(U256::from(20), U256::from(10));
        let mut utils = OrderStateUtils::new(&testing::chain(), &fake);
        utils.order_state(&first, GENESIS_TIMESTAMP).await.unwrap();

        // Chain changes are not observed by the same instance
        fake.set_balance(MAKER_TOKEN, first.maker, U256::ZERO);
        let second = testing::signed_order(U256::from(40), U256::from(10));
        assert!(
            utils
                .order_state(&second, GENESIS_TIMESTAMP)
                .await
                .unwrap()
                .is_valid()
        );
    }

    #[test]
    fn test_calculator_without_fee() {
        let order = testing::order(U256::from(100), U256::from(50));
        assert_eq!(
            calculator(&order, 100, 0).remaining_maker_fillable(),
            U256::from(100)
        );
        let short = calculator(&order, 30, 0);
        assert_eq!(short.remaining_maker_fillable(), U256::from(30));
        assert_eq!(short.remaining_taker_fillable(), U256::from(15));
    }

    #[test]
    fn test_calculator_bounded_by_fee() {
        let mut order = testing::order(U256::from(100), U256::from(50));
        order.maker_fee = U256::from(10);

        assert_eq!(
            calculator(&order, 100, 10).remaining_maker_fillable(),
            U256::from(100)
        );
        // Half the fee funds half the order
        assert_eq!(
            calculator(&order, 100, 5).remaining_maker_fillable(),
            U256::from(50)
        );
        // Maker token is the tighter bound
        assert_eq!(
            calculator(&order, 20, 5).remaining_maker_fillable(),
            U256::from(20)
        );
    }

    #[test]
    fn test_calculator_with_pooled_fee() {
        let mut order = testing::order(U256::from(100), U256::from(50));
        order.maker_fee = U256::from(10);
        order.maker_token_address = testing::chain().fee_token();

        assert_eq!(
            calculator(&order, 110, 110).remaining_maker_fillable(),
            U256::from(100)
        );
        let short = calculator(&order, 55, 55);
        assert_eq!(short.remaining_maker_fillable(), U256::from(50));
        assert_eq!(short.remaining_taker_fillable(), U256::from(25));
    }
}
