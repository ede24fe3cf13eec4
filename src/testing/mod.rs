//! In-memory chain and order fixtures.
//!
//! [`FakeChain`] implements [`ChainState`] over a map of balances, allowances
//! and exchange fill/cancel records, plus a list of logs the test mines into
//! blocks one at a time. Reads can be made to fail or to block until released,
//! to exercise error forwarding and cancellation.
//!
//! [`order`] and [`signed_order`] build orders of [`maker_signer`] trading
//! [`MAKER_TOKEN`] for [`TAKER_TOKEN`] on the [`chain`] fixture.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::{
    primitives::{Address, B256, U256, address, keccak256},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};
use tokio::sync::Notify;

use crate::{
    Chain,
    abi::erc20::IERC20,
    chain::{ChainState, LogFilter},
    error::ProviderError,
    types::{NULL_ADDRESS, Order, OrderHash, RawLog, SignedOrder},
};

/// Token the fixture orders sell.
pub const MAKER_TOKEN: Address = address!("0x000000000000000000000000000000000000a001");

/// Token the fixture orders buy.
pub const TAKER_TOKEN: Address = address!("0x000000000000000000000000000000000000a002");

/// Account filling the fixture orders.
pub const TAKER: Address = address!("0x000000000000000000000000000000000000b001");

/// Unix timestamp of the fake chain's head unless set otherwise.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Expiration of the fixture orders, far beyond [`GENESIS_TIMESTAMP`] and
/// the wall clock.
pub const FAR_EXPIRATION: u64 = 4_000_000_000;

/// Contracts of a local development chain.
pub fn chain() -> Chain {
    Chain::custom(
        1337,
        address!("0x00000000000000000000000000000000000e0001"),
        address!("0x00000000000000000000000000000000000e0002"),
        address!("0x00000000000000000000000000000000000e0003"),
        address!("0x00000000000000000000000000000000000e0004"),
    )
}

/// First well-known development key,
/// `0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266`.
pub fn maker_signer() -> PrivateKeySigner {
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
        .parse()
        .expect("valid private key")
}

/// Open order without fees.
pub fn order(maker_token_amount: U256, taker_token_amount: U256) -> Order {
    Order {
        maker: maker_signer().address(),
        taker: NULL_ADDRESS,
        maker_token_address: MAKER_TOKEN,
        taker_token_address: TAKER_TOKEN,
        fee_recipient: NULL_ADDRESS,
        exchange_contract_address: chain().exchange(),
        maker_token_amount,
        taker_token_amount,
        maker_fee: U256::ZERO,
        taker_fee: U256::ZERO,
        expiration_unix_timestamp_sec: U256::from(FAR_EXPIRATION),
        salt: U256::from(1),
    }
}

/// [`order`] signed by its maker.
pub fn signed_order(maker_token_amount: U256, taker_token_amount: U256) -> SignedOrder {
    SignedOrder::sign(order(maker_token_amount, taker_token_amount), &maker_signer())
        .expect("signing with a local key")
}

/// Blocks [`FakeChain`] log queries until released.
#[derive(Debug, Default)]
pub struct LogGate {
    started: Notify,
    release: Notify,
}

impl LogGate {
    /// Waits until a log query is blocked on the gate.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets one blocked (or the next) log query through.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Default)]
struct Inner {
    head: u64,
    timestamp: u64,
    blocks_mined: u64,
    logs: Vec<RawLog>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    filled: HashMap<OrderHash, U256>,
    cancelled: HashMap<OrderHash, U256>,
    failures: usize,
    gate: Option<Arc<LogGate>>,
}

impl Inner {
    fn new_block(&mut self) -> (u64, B256) {
        self.head += 1;
        self.blocks_mined += 1;
        (self.head, keccak256(self.blocks_mined.to_be_bytes()))
    }
}

/// Shared in-memory chain, clones observe the same state.
#[derive(Clone, Debug)]
pub struct FakeChain {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    /// Chain at block 0 with nothing on it.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                timestamp: GENESIS_TIMESTAMP,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn head(&self) -> u64 {
        self.lock().head
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.lock().timestamp = timestamp;
    }

    /// Sets the balance without emitting any event.
    pub fn set_balance(&self, token: Address, owner: Address, balance: U256) {
        self.lock().balances.insert((token, owner), balance);
    }

    /// Sets the allowance without emitting any event.
    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, allowance: U256) {
        self.lock()
            .allowances
            .insert((token, owner, spender), allowance);
    }

    /// Gives `owner` `amount` of `token` and approves it to `spender`, silently.
    pub fn fund(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.set_balance(token, owner, amount);
        self.set_allowance(token, owner, spender, amount);
    }

    pub fn set_filled(&self, order_hash: OrderHash, amount: U256) {
        self.lock().filled.insert(order_hash, amount);
    }

    pub fn set_cancelled(&self, order_hash: OrderHash, amount: U256) {
        self.lock().cancelled.insert(order_hash, amount);
    }

    /// Mines a block with the log in it. Block number and hash of the log
    /// are overwritten, the stored log is returned.
    pub fn push_log_in_new_block(&self, mut log: RawLog) -> RawLog {
        let mut inner = self.lock();
        let (number, hash) = inner.new_block();
        log.block_number = Some(number);
        log.block_hash = Some(hash);
        inner.logs.push(log.clone());
        log
    }

    /// Replaces the head block with one containing only the given log.
    pub fn reorg_last_block(&self, mut log: RawLog) -> RawLog {
        let mut inner = self.lock();
        let head = inner.head;
        inner.logs.retain(|l| l.block_number != Some(head));
        inner.head = inner.head.saturating_sub(1);
        let (number, hash) = inner.new_block();
        log.block_number = Some(number);
        log.block_hash = Some(hash);
        inner.logs.push(log.clone());
        log
    }

    pub fn mine_empty_blocks(&self, count: u64) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.new_block();
        }
    }

    /// Forgets every log while keeping the head, as a misbehaving node would.
    pub fn drop_logs(&self) {
        self.lock().logs.clear();
    }

    /// Mines a block with the event emitted by `address`.
    pub fn emit<E: SolEvent>(&self, address: Address, event: &E) -> RawLog {
        let data = event.encode_log_data();
        self.push_log_in_new_block(RawLog {
            address,
            topics: data.topics().to_vec(),
            data: data.data,
            block_hash: None,
            block_number: None,
            tx_hash: Some(keccak256(address.as_slice())),
            tx_index: Some(0),
            log_index: Some(0),
        })
    }

    /// Sets the allowance and emits the matching `Approval` event.
    pub fn approve(&self, token: Address, owner: Address, spender: Address, value: U256) -> RawLog {
        self.set_allowance(token, owner, spender, value);
        self.emit(
            token,
            &IERC20::Approval {
                owner,
                spender,
                value,
            },
        )
    }

    /// Moves balance and emits the matching `Transfer` event. The sender's
    /// balance saturates at zero.
    pub fn transfer(&self, token: Address, from: Address, to: Address, value: U256) -> RawLog {
        {
            let mut inner = self.lock();
            let from_balance = inner.balances.entry((token, from)).or_default();
            *from_balance = from_balance.saturating_sub(value);
            let to_balance = inner.balances.entry((token, to)).or_default();
            *to_balance = to_balance.saturating_add(value);
        }
        self.emit(token, &IERC20::Transfer { from, to, value })
    }

    /// Makes the next `count` reads of any kind fail with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failures = count;
    }

    /// Makes log queries block until released through the returned gate.
    pub fn hold_logs(&self) -> Arc<LogGate> {
        let gate = Arc::new(LogGate::default());
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Lets log queries through again.
    pub fn open_logs(&self) {
        if let Some(gate) = self.lock().gate.take() {
            gate.release();
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> Result<T, ProviderError> {
        let mut inner = self.lock();
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(ProviderError::Transport("injected failure".to_string()));
        }
        Ok(f(&inner))
    }
}

impl ChainState for FakeChain {
    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.read(|inner| inner.head)
    }

    async fn block_timestamp(&self) -> Result<u64, ProviderError> {
        self.read(|inner| inner.timestamp)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ProviderError> {
        let gate = self.read(|inner| inner.gate.clone())?;
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ProviderError> {
        self.read(|inner| {
            inner
                .balances
                .get(&(token, owner))
                .copied()
                .unwrap_or_default()
        })
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ProviderError> {
        self.read(|inner| {
            inner
                .allowances
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or_default()
        })
    }

    async fn filled_taker_amount(
        &self,
        _exchange: Address,
        order_hash: OrderHash,
    ) -> Result<U256, ProviderError> {
        self.read(|inner| inner.filled.get(&order_hash).copied().unwrap_or_default())
    }

    async fn cancelled_taker_amount(
        &self,
        _exchange: Address,
        order_hash: OrderHash,
    ) -> Result<U256, ProviderError> {
        self.read(|inner| inner.cancelled.get(&order_hash).copied().unwrap_or_default())
    }
}
