use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::{
    primitives::{Address, B256, U256, address},
    sol_types::SolEvent,
};
use dex_order_sdk::{
    abi::{erc20::IERC20, ether_token::IEtherToken, exchange::IExchange},
    error::{DexError, ExchangeContractError},
    state::OrderState,
    testing::{self, FakeChain, MAKER_TOKEN, TAKER, TAKER_TOKEN},
    types::{Order, OrderHash, RawLog, SignedOrder, TradeSide, TransferType, UNLIMITED_ALLOWANCE},
    watcher::{OrderStateWatcher, WatcherConfig},
};
use tokio::{sync::mpsc, time};

type Received = Result<OrderState, DexError>;

const OTHER_TOKEN: Address = address!("0x000000000000000000000000000000000000a003");

fn maker() -> Address {
    testing::maker_signer().address()
}

fn sign(order: Order) -> SignedOrder {
    SignedOrder::sign(order, &testing::maker_signer()).unwrap()
}

/// Chain where the maker holds 100 of both [`MAKER_TOKEN`] and
/// [`OTHER_TOKEN`], fully approved to the proxy.
fn funded_chain() -> FakeChain {
    let proxy = testing::chain().token_transfer_proxy();
    let chain = FakeChain::new();
    chain.fund(MAKER_TOKEN, maker(), proxy, U256::from(100));
    chain.fund(OTHER_TOKEN, maker(), proxy, U256::from(100));
    chain
}

fn subscribe(watcher: &OrderStateWatcher<FakeChain>) -> mpsc::UnboundedReceiver<Received> {
    let (tx, rx) = mpsc::unbounded_channel();
    watcher
        .subscribe(move |state| {
            let _ = tx.send(state);
        })
        .unwrap();
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("no order state within two minutes")
        .expect("subscription dropped")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Received>) {
    time::sleep(Duration::from_secs(35)).await;
    assert!(rx.try_recv().is_err(), "unexpected order state");
}

fn invalid(order_hash: OrderHash, error: ExchangeContractError) -> Received {
    Ok(OrderState::Invalid { order_hash, error })
}

const MAKER_ALLOWANCE: ExchangeContractError = ExchangeContractError::InsufficientAllowance {
    side: TradeSide::Maker,
    transfer_type: TransferType::Trade,
};

/// Revoking the proxy allowance invalidates exactly the orders selling the
/// revoked token.
#[tokio::test(start_paused = true)]
async fn test_allowance_revocation() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());

    let affected = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();
    let mut other = testing::order(U256::from(20), U256::from(10));
    other.maker_token_address = OTHER_TOKEN;
    watcher.add_order(sign(other)).unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);

    assert_eq!(next(&mut rx).await, invalid(affected, MAKER_ALLOWANCE));
    assert_quiet(&mut rx).await;
}

/// Transfers between accounts no watched order depends on are ignored, as
/// are recomputed states equal to the last delivered one.
#[tokio::test(start_paused = true)]
async fn test_irrelevant_and_unchanged_updates_are_suppressed() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    chain.transfer(MAKER_TOKEN, TAKER, Address::repeat_byte(7), U256::from(1));
    assert_quiet(&mut rx).await;

    chain.transfer(MAKER_TOKEN, maker(), TAKER, U256::from(10));
    let Ok(OrderState::Valid {
        order_hash: hash,
        relevant_state,
    }) = next(&mut rx).await
    else {
        panic!("expected a valid order state");
    };
    assert_eq!(hash, order_hash);
    assert_eq!(relevant_state.maker_balance, U256::from(90));
    assert_eq!(relevant_state.remaining_fillable_maker_token_amount, U256::from(20));
    assert_eq!(relevant_state.remaining_fillable_taker_token_amount, U256::from(10));

    // Re-approving the same amount recomputes the same state
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::from(100));
    assert_quiet(&mut rx).await;
}

/// A poll in flight when unsubscribing never reaches the callback.
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_poll() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);

    let gate = chain.hold_logs();
    let mut rx = subscribe(&watcher);
    gate.wait_started().await;

    watcher.unsubscribe().unwrap();
    chain.open_logs();
    time::sleep(Duration::from_secs(35)).await;

    assert!(rx.recv().await.is_none());
    assert!(!watcher.is_subscribed());
}

/// Failed reads are forwarded to the callback and polling carries on.
#[tokio::test(start_paused = true)]
async fn test_provider_errors_are_forwarded() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    chain.fail_next_reads(1);

    assert!(matches!(next(&mut rx).await, Err(DexError::Provider(_))));

    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));
}

/// A new subscription starts from scratch, states are delivered again.
#[tokio::test(start_paused = true)]
async fn test_resubscribe() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));

    assert_eq!(
        watcher.subscribe(|_| {}),
        Err(DexError::SubscriptionAlreadyPresent)
    );
    watcher.unsubscribe().unwrap();
    assert_eq!(watcher.unsubscribe(), Err(DexError::SubscriptionNotFound));

    let mut rx = subscribe(&watcher);
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));
    watcher.unsubscribe().unwrap();
}

/// Swapping the provider restarts the subscription on the new chain.
#[tokio::test(start_paused = true)]
async fn test_set_provider() {
    let proxy = testing::chain().token_transfer_proxy();
    let first = funded_chain();
    let second = funded_chain();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), first.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;

    second.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);
    watcher.set_provider(second.clone());
    assert!(watcher.is_subscribed());
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));

    // The previous chain is no longer watched
    first.transfer(MAKER_TOKEN, maker(), TAKER, U256::from(100));
    assert_quiet(&mut rx).await;
}

/// A poll in flight on the previous provider when it is swapped never
/// reaches the callback.
#[tokio::test(start_paused = true)]
async fn test_set_provider_during_poll() {
    let proxy = testing::chain().token_transfer_proxy();
    let previous = funded_chain();
    let current = funded_chain();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), previous.clone(), WatcherConfig::default());
    watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();
    previous.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);

    let gate = previous.hold_logs();
    let mut rx = subscribe(&watcher);
    gate.wait_started().await;

    watcher.set_provider(current.clone());
    previous.open_logs();

    assert_quiet(&mut rx).await;
    assert!(watcher.is_subscribed());
}

/// Zero intervals do not bring the subscription down, polling carries on
/// and errors still reach the callback.
#[tokio::test(start_paused = true)]
async fn test_zero_poll_interval() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let config = WatcherConfig::default()
        .with_poll_interval(Duration::ZERO)
        .with_expiration_check_interval(Duration::ZERO);
    let watcher = OrderStateWatcher::new(&testing::chain(), chain.clone(), config);
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    chain.fail_next_reads(1);
    assert!(matches!(next(&mut rx).await, Err(DexError::Provider(_))));

    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));
    assert!(watcher.is_subscribed());
}

/// Fills reported by the exchange are picked up by order hash.
#[tokio::test(start_paused = true)]
async fn test_fill_event() {
    let chain = funded_chain();
    let dex = testing::chain();
    let watcher = OrderStateWatcher::new(&dex, chain.clone(), WatcherConfig::default());
    let signed = testing::signed_order(U256::from(20), U256::from(10));
    let order_hash = watcher.add_order(signed.clone()).unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;

    chain.set_filled(order_hash, U256::from(10));
    chain.emit(
        dex.exchange(),
        &IExchange::LogFill {
            maker: signed.maker,
            taker: TAKER,
            feeRecipient: signed.fee_recipient,
            makerToken: MAKER_TOKEN,
            takerToken: TAKER_TOKEN,
            filledMakerTokenAmount: U256::from(20),
            filledTakerTokenAmount: U256::from(10),
            paidMakerFee: U256::ZERO,
            paidTakerFee: U256::ZERO,
            tokens: B256::ZERO,
            orderHash: order_hash,
        },
    );

    assert_eq!(
        next(&mut rx).await,
        invalid(order_hash, ExchangeContractError::OrderRemainingFillAmountZero)
    );
}

/// Wrapped ether withdrawals invalidate orders selling wrapped ether.
#[tokio::test(start_paused = true)]
async fn test_wrapped_ether_withdrawal() {
    let dex = testing::chain();
    let chain = FakeChain::new();
    chain.fund(dex.ether_token(), maker(), dex.token_transfer_proxy(), U256::from(100));
    let watcher = OrderStateWatcher::new(&dex, chain.clone(), WatcherConfig::default());
    let mut order = testing::order(U256::from(20), U256::from(10));
    order.maker_token_address = dex.ether_token();
    let order_hash = watcher.add_order(sign(order)).unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;

    chain.set_balance(dex.ether_token(), maker(), U256::ZERO);
    chain.emit(
        dex.ether_token(),
        &IEtherToken::Withdrawal {
            owner: maker(),
            value: U256::from(100),
        },
    );

    assert_eq!(
        next(&mut rx).await,
        invalid(
            order_hash,
            ExchangeContractError::InsufficientBalance {
                side: TradeSide::Maker,
                transfer_type: TransferType::Trade,
            }
        )
    );
}

/// Logs removed by a reorg trigger revalidation like new ones.
#[tokio::test(start_paused = true)]
async fn test_reorged_approval() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);
    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));

    // The approval never happened on the canonical chain
    chain.set_allowance(MAKER_TOKEN, maker(), proxy, UNLIMITED_ALLOWANCE);
    let unrelated = IERC20::Transfer {
        from: TAKER,
        to: Address::repeat_byte(7),
        value: U256::from(1),
    }
    .encode_log_data();
    chain.reorg_last_block(RawLog {
        address: MAKER_TOKEN,
        topics: unrelated.topics().to_vec(),
        data: unrelated.data,
        block_hash: None,
        block_number: None,
        tx_hash: Some(B256::repeat_byte(1)),
        tx_index: Some(0),
        log_index: Some(0),
    });

    let state = next(&mut rx).await.unwrap();
    assert_eq!(state.order_hash(), order_hash);
    assert!(state.is_valid());
}

/// Orders within the expiration margin are reported expired once and
/// dropped.
#[tokio::test(start_paused = true)]
async fn test_expiration_margin() {
    let now_sec = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let config = WatcherConfig::default().with_expiration_margin(Duration::from_secs(120));
    let watcher = OrderStateWatcher::new(&testing::chain(), funded_chain(), config);

    let mut expiring = testing::order(U256::from(20), U256::from(10));
    expiring.expiration_unix_timestamp_sec = U256::from(now_sec + 60);
    let expiring = watcher.add_order(sign(expiring)).unwrap();
    let lasting = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    assert_eq!(
        next(&mut rx).await,
        invalid(expiring, ExchangeContractError::OrderFillExpired)
    );
    assert_quiet(&mut rx).await;
    assert!(watcher.get_order(&expiring).is_none());
    assert!(watcher.get_order(&lasting).is_some());
}

/// The periodic cleanup revalidates orders no event was seen for.
#[tokio::test(start_paused = true)]
async fn test_cleanup_revalidates_all_orders() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let config = WatcherConfig::default().with_cleanup_interval(Duration::from_secs(60));
    let watcher = OrderStateWatcher::new(&testing::chain(), chain.clone(), config);
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    chain.set_allowance(MAKER_TOKEN, maker(), proxy, U256::ZERO);

    assert_eq!(next(&mut rx).await, invalid(order_hash, MAKER_ALLOWANCE));
}

/// Removed orders are no longer reported.
#[tokio::test(start_paused = true)]
async fn test_removed_order_is_not_reported() {
    let chain = funded_chain();
    let proxy = testing::chain().token_transfer_proxy();
    let watcher =
        OrderStateWatcher::new(&testing::chain(), chain.clone(), WatcherConfig::default());
    let order_hash = watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();
    // Re-adding is a no-op
    watcher
        .add_order(testing::signed_order(U256::from(20), U256::from(10)))
        .unwrap();
    assert_eq!(watcher.len(), 1);

    let mut rx = subscribe(&watcher);
    time::sleep(Duration::from_secs(1)).await;
    assert!(watcher.remove_order(&order_hash).is_some());
    chain.approve(MAKER_TOKEN, maker(), proxy, U256::ZERO);

    assert_quiet(&mut rx).await;
}
