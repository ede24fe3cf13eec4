//! Order state watcher.
//!
//! [`OrderStateWatcher`] keeps a set of signed orders and, while subscribed,
//! polls the chain for events that can change their fillability: token
//! transfers and approvals of their makers, wrapped ether deposits and
//! withdrawals, and fills and cancels of the orders themselves. Every order
//! affected by a poll is re-evaluated and its new [`OrderState`] delivered to
//! the subscriber, unless it did not change since the previous delivery.
//!
//! Besides polling, the watcher removes orders as they expire, reporting
//! [`ExchangeContractError::OrderFillExpired`] for them, and periodically
//! re-evaluates every order to catch changes no event was seen for.
//!
//! The subscriber callback runs on the watcher's task. It may add and
//! remove orders, but calling [`OrderStateWatcher::subscribe`] or
//! [`OrderStateWatcher::unsubscribe`] from it deadlocks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::Address;
use itertools::Itertools;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

use crate::{
    Chain,
    chain::ChainState,
    decode::LogDecoder,
    error::{DexError, ExchangeContractError},
    state::{ExpirationWatcher, OrderState, OrderStateIndex, OrderStateUtils},
    stream::{DEFAULT_REORG_WINDOW, LogPoller, PollerConfig},
    types::{DecodedLogArgs, DecodedLogEvent, OrderHash, SignedOrder},
};

/// Default interval between log polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between expiration checks.
pub const DEFAULT_EXPIRATION_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Default interval between re-evaluations of every watched order.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shortest interval accepted for any of the watcher's periodic jobs.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Receives order states, or errors that prevented computing them.
pub type OnOrderStateChange = Box<dyn FnMut(Result<OrderState, DexError>) + Send>;

/// Watcher timing and polling settings.
#[derive(Clone, Copy, Debug)]
pub struct WatcherConfig {
    poll_interval: Duration,
    poller: PollerConfig,
    expiration_check_interval: Duration,
    expiration_margin: Duration,
    cleanup_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: PollerConfig {
                reorg_window: DEFAULT_REORG_WINDOW,
                ..Default::default()
            },
            expiration_check_interval: DEFAULT_EXPIRATION_CHECK_INTERVAL,
            expiration_margin: Duration::ZERO,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl WatcherConfig {
    /// Sets the interval between log polls (default: 10s), at least
    /// [`MIN_INTERVAL`].
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_INTERVAL);
        self
    }

    /// Sets the number of most recent blocks re-queried on every poll,
    /// which bounds the depth of reorgs detected (default: 5).
    pub fn with_reorg_window(mut self, blocks: u64) -> Self {
        self.poller.reorg_window = blocks.max(1);
        self
    }

    /// Sets the number of blocks to stay behind the head (default: 0).
    pub fn with_confirmations(mut self, blocks: u64) -> Self {
        self.poller.confirmations = blocks;
        self
    }

    /// Skips empty poll responses instead of treating every previously seen
    /// log as removed (default: off). Use with nodes that intermittently
    /// return nothing.
    pub fn with_ignore_empty_polls(mut self, ignore: bool) -> Self {
        self.poller.ignore_empty_polls = ignore;
        self
    }

    /// Sets the granularity of expiration checks (default: 50ms), at least
    /// [`MIN_INTERVAL`].
    pub fn with_expiration_check_interval(mut self, interval: Duration) -> Self {
        self.expiration_check_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Makes orders count as expired this long before their actual
    /// expiration (default: 0).
    pub fn with_expiration_margin(mut self, margin: Duration) -> Self {
        self.expiration_margin = margin;
        self
    }

    /// Sets the interval between re-evaluations of every watched order
    /// (default: 1h), at least [`MIN_INTERVAL`].
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn poller(&self) -> PollerConfig {
        self.poller
    }
}

/// Watched orders.
#[derive(Debug)]
struct Orders {
    index: OrderStateIndex,
    expiration: ExpirationWatcher,
}

struct Subscription {
    id: u64,
    callback: OnOrderStateChange,
    task: JoinHandle<()>,
}

struct Shared<S> {
    chain: Chain,
    config: WatcherConfig,
    decoder: LogDecoder,
    state: Mutex<S>,
    orders: Mutex<Orders>,
    subscription: Mutex<Option<Subscription>>,
    next_subscription_id: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Tracks the state of a set of orders.
///
/// Idle until [`Self::subscribe`] is called, watching until
/// [`Self::unsubscribe`]. Orders can be added and removed in either state and
/// are kept across subscriptions.
pub struct OrderStateWatcher<S> {
    shared: Arc<Shared<S>>,
}

impl<S: ChainState + Clone + 'static> OrderStateWatcher<S> {
    pub fn new(chain: &Chain, state: S, config: WatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain: chain.clone(),
                config,
                decoder: LogDecoder::new(chain),
                state: Mutex::new(state),
                orders: Mutex::new(Orders {
                    index: OrderStateIndex::new(chain.fee_token()),
                    expiration: ExpirationWatcher::new(config.expiration_margin),
                }),
                subscription: Mutex::new(None),
                next_subscription_id: Mutex::new(0),
            }),
        }
    }

    /// Starts watching the order. Fails if its signature is not the maker's.
    pub fn add_order(&self, signed_order: SignedOrder) -> Result<OrderHash, DexError> {
        if !signed_order.is_valid_signature() {
            return Err(ExchangeContractError::InvalidSignature.into());
        }
        let expiration_ms = signed_order.expiration_ms();
        let mut orders = lock(&self.shared.orders);
        let order_hash = orders.index.add_order(signed_order);
        orders.expiration.add_order(order_hash, expiration_ms);
        debug!(%order_hash, watched = orders.index.len(), "Order added");
        Ok(order_hash)
    }

    /// Stops watching the order, no-op if it is not watched.
    pub fn remove_order(&self, order_hash: &OrderHash) -> Option<SignedOrder> {
        let mut orders = lock(&self.shared.orders);
        orders.expiration.remove_order(order_hash);
        let removed = orders.index.remove_order(order_hash);
        if removed.is_some() {
            debug!(%order_hash, watched = orders.index.len(), "Order removed");
        }
        removed
    }

    pub fn get_order(&self, order_hash: &OrderHash) -> Option<SignedOrder> {
        lock(&self.shared.orders)
            .index
            .get_order(order_hash)
            .cloned()
    }

    /// Number of watched orders.
    pub fn len(&self) -> usize {
        lock(&self.shared.orders).index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.subscription).is_some()
    }

    /// Starts watching the chain and delivering order state changes to the
    /// callback. Must be called within a Tokio runtime.
    pub fn subscribe<F>(&self, callback: F) -> Result<(), DexError>
    where
        F: FnMut(Result<OrderState, DexError>) + Send + 'static,
    {
        let mut subscription = lock(&self.shared.subscription);
        if subscription.is_some() {
            return Err(DexError::SubscriptionAlreadyPresent);
        }
        let (id, task) = self.spawn_task();
        *subscription = Some(Subscription {
            id,
            callback: Box::new(callback),
            task,
        });
        info!(id, "Subscribed to order state changes");
        Ok(())
    }

    /// Stops watching the chain. No callback invocation happens after this
    /// returns, including for polls that were in flight.
    pub fn unsubscribe(&self) -> Result<(), DexError> {
        let subscription = lock(&self.shared.subscription)
            .take()
            .ok_or(DexError::SubscriptionNotFound)?;
        subscription.task.abort();
        info!(id = subscription.id, "Unsubscribed from order state changes");
        Ok(())
    }

    /// Replaces the chain access. A live subscription is restarted on top of
    /// the new one, nothing read through the previous one is delivered
    /// afterwards.
    pub fn set_provider(&self, state: S) {
        let mut subscription = lock(&self.shared.subscription);
        *lock(&self.shared.state) = state;
        if let Some(current) = subscription.as_mut() {
            current.task.abort();
            let (id, task) = self.spawn_task();
            info!(previous = current.id, id, "Restarted subscription on provider change");
            current.id = id;
            current.task = task;
        }
    }

    fn spawn_task(&self) -> (u64, JoinHandle<()>) {
        let id = {
            let mut next = lock(&self.shared.next_subscription_id);
            *next += 1;
            *next
        };
        let task = WatcherTask {
            shared: self.shared.clone(),
            id,
            state: lock(&self.shared.state).clone(),
            poller: LogPoller::new(self.shared.config.poller),
            last_states: HashMap::new(),
        };
        (id, tokio::spawn(task.run()))
    }
}

impl<S> Drop for OrderStateWatcher<S> {
    fn drop(&mut self) {
        if let Some(subscription) = lock(&self.shared.subscription).take() {
            subscription.task.abort();
        }
    }
}

/// Polling loop of one subscription. Owns the log snapshot and the states
/// last delivered, both are dropped along with the subscription.
struct WatcherTask<S> {
    shared: Arc<Shared<S>>,
    id: u64,
    state: S,
    poller: LogPoller,
    last_states: HashMap<OrderHash, OrderState>,
}

impl<S: ChainState + Clone + 'static> WatcherTask<S> {
    async fn run(mut self) {
        let config = self.shared.config;
        let mut poll = time::interval(config.poll_interval);
        let mut expiration = time::interval(config.expiration_check_interval);
        let mut cleanup = time::interval_at(
            Instant::now() + config.cleanup_interval,
            config.cleanup_interval,
        );
        for interval in [&mut poll, &mut expiration, &mut cleanup] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            let subscribed = tokio::select! {
                _ = poll.tick() => self.on_poll().await,
                _ = expiration.tick() => self.on_expiration_check(),
                _ = cleanup.tick() => self.on_cleanup().await,
            };
            if !subscribed {
                debug!(id = self.id, "Subscription gone, stopping");
                break;
            }
        }
    }

    /// Hands the result to the callback if this task still serves the live
    /// subscription. Returns `false` otherwise.
    fn deliver(&self, result: Result<OrderState, DexError>) -> bool {
        let mut subscription = lock(&self.shared.subscription);
        match subscription.as_mut() {
            Some(current) if current.id == self.id => {
                (current.callback)(result);
                true
            }
            _ => false,
        }
    }

    /// Delivers the state unless it equals the last one delivered for the
    /// order.
    fn deliver_state(&mut self, state: OrderState) -> bool {
        let order_hash = state.order_hash();
        if self.last_states.get(&order_hash) == Some(&state) {
            trace!(%order_hash, "Order state unchanged");
            return true;
        }
        self.last_states.insert(order_hash, state.clone());
        self.deliver(Ok(state))
    }

    /// Contracts whose events can affect the watched orders.
    fn watched_addresses(&self) -> Vec<Address> {
        let orders = lock(&self.shared.orders);
        let chain = &self.shared.chain;
        [chain.exchange(), chain.ether_token()]
            .into_iter()
            .chain(orders.index.token_addresses())
            .unique()
            .collect()
    }

    async fn on_poll(&mut self) -> bool {
        let events = match self
            .poller
            .poll(&self.state, self.watched_addresses())
            .await
        {
            Ok(events) => events,
            Err(err) => {
                warn!(id = self.id, %err, "Failed to poll logs");
                return self.deliver(Err(err.into()));
            }
        };

        let decoded: Vec<_> = events
            .iter()
            .filter_map(|event| self.shared.decoder.decode(event))
            .collect();
        for event in &decoded {
            trace!(
                id = self.id,
                event = event.args().name(),
                address = %event.log.address,
                removed = event.is_removed,
                "Decoded log"
            );
        }
        let affected: Vec<SignedOrder> = {
            let orders = lock(&self.shared.orders);
            decoded
                .iter()
                .flat_map(|event| self.dependent_orders(&orders.index, event))
                .unique()
                .filter_map(|order_hash| orders.index.get_order(&order_hash).cloned())
                .collect()
        };
        debug!(
            id = self.id,
            events = events.len(),
            decoded = decoded.len(),
            affected = affected.len(),
            "Processed poll"
        );
        self.revalidate(affected).await
    }

    /// Watched orders the event can affect, in a deterministic order.
    fn dependent_orders(
        &self,
        index: &OrderStateIndex,
        event: &DecodedLogEvent<DecodedLogArgs>,
    ) -> Vec<OrderHash> {
        let token = event.log.address;
        match *event.args() {
            DecodedLogArgs::Transfer { from, to, .. } => index
                .orders_dependent_on(from, token)
                .into_iter()
                .chain(index.orders_dependent_on(to, token))
                .collect(),
            DecodedLogArgs::Approval { owner, spender, .. } => {
                if spender != self.shared.chain.token_transfer_proxy() {
                    return Vec::new();
                }
                index.orders_dependent_on(owner, token).into_iter().collect()
            }
            DecodedLogArgs::Deposit { owner, .. } | DecodedLogArgs::Withdrawal { owner, .. } => {
                index.orders_dependent_on(owner, token).into_iter().collect()
            }
            DecodedLogArgs::Fill { order_hash, .. } | DecodedLogArgs::Cancel { order_hash, .. } => {
                if index.contains(&order_hash) {
                    vec![order_hash]
                } else {
                    Vec::new()
                }
            }
            DecodedLogArgs::Error { .. } => Vec::new(),
        }
    }

    /// Recomputes the orders one after another against a single view of the
    /// chain and delivers the states that changed.
    async fn revalidate(&mut self, signed_orders: Vec<SignedOrder>) -> bool {
        {
            let orders = lock(&self.shared.orders);
            self.last_states
                .retain(|order_hash, _| orders.index.contains(order_hash));
        }
        if signed_orders.is_empty() {
            return true;
        }

        let now_sec = unix_now_ms() / 1000;
        let mut utils = OrderStateUtils::new(&self.shared.chain, &self.state);
        let mut states = Vec::with_capacity(signed_orders.len());
        for signed_order in &signed_orders {
            states.push(utils.order_state(signed_order, now_sec).await);
        }
        drop(utils);

        for state in states {
            let subscribed = match state {
                Ok(state) => self.deliver_state(state),
                Err(err) => {
                    warn!(id = self.id, %err, "Failed to compute order state");
                    self.deliver(Err(err.into()))
                }
            };
            if !subscribed {
                return false;
            }
        }
        true
    }

    fn on_expiration_check(&mut self) -> bool {
        let expired = {
            let mut orders = lock(&self.shared.orders);
            let expired = orders.expiration.prune_expired(unix_now_ms());
            for order_hash in &expired {
                orders.index.remove_order(order_hash);
            }
            expired
        };
        for order_hash in expired {
            info!(id = self.id, %order_hash, "Order expired");
            self.last_states.remove(&order_hash);
            let state = OrderState::Invalid {
                order_hash,
                error: ExchangeContractError::OrderFillExpired,
            };
            if !self.deliver(Ok(state)) {
                return false;
            }
        }
        true
    }

    async fn on_cleanup(&mut self) -> bool {
        let watched: Vec<SignedOrder> = lock(&self.shared.orders)
            .index
            .orders()
            .map(|(_, signed_order)| signed_order.clone())
            .collect();
        debug!(id = self.id, orders = watched.len(), "Re-evaluating all orders");
        self.revalidate(watched).await
    }
}
