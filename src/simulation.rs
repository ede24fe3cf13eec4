//! Off-chain replay of the token transfers a fill performs.
//!
//! [`BalanceAndAllowanceLazyStore`] mirrors ERC-20 balances and proxy
//! allowances, fetching each `(token, owner)` pair from the chain on first
//! access and keeping it for the lifetime of the store. [`TransferSimulator`]
//! applies hypothetical transfers to it, so a sequence of simulated transfers
//! observes its own effects rather than re-reading the chain mid-sequence.

use std::collections::{HashMap, hash_map::Entry};

use alloy::primitives::{Address, U256};

use crate::{
    chain::ChainState,
    error::{DexError, ExchangeContractError, ProviderError},
    types::{NULL_ADDRESS, TradeSide, TransferType, UNLIMITED_ALLOWANCE},
};

/// Lazily populated working copy of balances and proxy allowances.
#[derive(Debug)]
pub struct BalanceAndAllowanceLazyStore<'s, S> {
    state: &'s S,
    proxy: Address,
    balances: HashMap<(Address, Address), U256>,
    proxy_allowances: HashMap<(Address, Address), U256>,
}

impl<'s, S: ChainState> BalanceAndAllowanceLazyStore<'s, S> {
    /// `proxy` is the spender allowances are read for.
    pub fn new(state: &'s S, proxy: Address) -> Self {
        Self {
            state,
            proxy,
            balances: HashMap::new(),
            proxy_allowances: HashMap::new(),
        }
    }

    pub fn chain_state(&self) -> &'s S {
        self.state
    }

    pub async fn balance(&mut self, token: Address, owner: Address) -> Result<U256, ProviderError> {
        match self.balances.entry((token, owner)) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let balance = self.state.balance_of(token, owner).await?;
                Ok(*entry.insert(balance))
            }
        }
    }

    pub async fn proxy_allowance(
        &mut self,
        token: Address,
        owner: Address,
    ) -> Result<U256, ProviderError> {
        match self.proxy_allowances.entry((token, owner)) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let allowance = self.state.allowance(token, owner, self.proxy).await?;
                Ok(*entry.insert(allowance))
            }
        }
    }

    /// Overrides the tracked balance, the chain is not consulted for the pair afterwards.
    pub fn set_balance(&mut self, token: Address, owner: Address, balance: U256) {
        self.balances.insert((token, owner), balance);
    }

    /// Overrides the tracked proxy allowance, the chain is not consulted for the pair afterwards.
    pub fn set_proxy_allowance(&mut self, token: Address, owner: Address, allowance: U256) {
        self.proxy_allowances.insert((token, owner), allowance);
    }

    /// Balances tracked so far for the token.
    pub fn tracked_balances(&self, token: Address) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.balances
            .iter()
            .filter(move |((t, _), _)| *t == token)
            .map(|((_, owner), balance)| (*owner, *balance))
    }
}

/// Simulates `transferFrom` calls the exchange makes through the token
/// transfer proxy.
#[derive(Debug)]
pub struct TransferSimulator<'s, S> {
    store: BalanceAndAllowanceLazyStore<'s, S>,
}

impl<'s, S: ChainState> TransferSimulator<'s, S> {
    pub fn new(state: &'s S, proxy: Address) -> Self {
        Self {
            store: BalanceAndAllowanceLazyStore::new(state, proxy),
        }
    }

    pub fn store(&mut self) -> &mut BalanceAndAllowanceLazyStore<'s, S> {
        &mut self.store
    }

    /// Moves `amount` of `token` from `from` to `to`, as the proxy would.
    ///
    /// Fails without touching the tracked state if the proxy allowance or
    /// the balance of `from` is below `amount`, allowance being checked first.
    /// [`UNLIMITED_ALLOWANCE`] is never decremented.
    ///
    /// Zero amounts and transfers to [`NULL_ADDRESS`] are no-ops.
    pub async fn transfer_from(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        side: TradeSide,
        transfer_type: TransferType,
    ) -> Result<(), DexError> {
        if amount.is_zero() || to == NULL_ADDRESS {
            return Ok(());
        }

        let allowance = self.store.proxy_allowance(token, from).await?;
        if allowance < amount {
            return Err(ExchangeContractError::InsufficientAllowance {
                side,
                transfer_type,
            }
            .into());
        }

        let from_balance = self.store.balance(token, from).await?;
        if from_balance < amount {
            return Err(ExchangeContractError::InsufficientBalance {
                side,
                transfer_type,
            }
            .into());
        }

        // Fetch before any mutation so a failed read leaves the state intact
        let to_balance = self.store.balance(token, to).await?;

        if allowance != UNLIMITED_ALLOWANCE {
            self.store
                .set_proxy_allowance(token, from, allowance - amount);
        }
        if from == to {
            return Ok(());
        }
        self.store.set_balance(token, from, from_balance - amount);
        self.store
            .set_balance(token, to, to_balance.saturating_add(amount));
        Ok(())
    }
}
