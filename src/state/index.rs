use std::collections::{BTreeSet, HashMap, hash_map::Entry};

use alloy::primitives::Address;

use crate::types::{OrderHash, SignedOrder};

/// Watched orders along with reverse lookup of the orders depending on a
/// maker's balance and allowance of a token.
///
/// Every order depends on its maker's maker token and fee token. Buckets and
/// per-maker maps are created on demand and dropped as soon as they become
/// empty.
#[derive(Clone, Debug)]
pub struct OrderStateIndex {
    fee_token: Address,
    orders: HashMap<OrderHash, SignedOrder>,
    dependent: HashMap<Address, HashMap<Address, BTreeSet<OrderHash>>>,
}

impl OrderStateIndex {
    pub fn new(fee_token: Address) -> Self {
        Self {
            fee_token,
            orders: HashMap::new(),
            dependent: HashMap::new(),
        }
    }

    /// Adds the order, no-op if it is already present.
    pub fn add_order(&mut self, signed_order: SignedOrder) -> OrderHash {
        let order_hash = signed_order.hash();
        let Entry::Vacant(entry) = self.orders.entry(order_hash) else {
            return order_hash;
        };
        let maker = signed_order.maker;
        let tokens = [signed_order.maker_token_address, self.fee_token];
        entry.insert(signed_order);

        let by_token = self.dependent.entry(maker).or_default();
        for token in tokens {
            by_token.entry(token).or_default().insert(order_hash);
        }
        order_hash
    }

    /// Removes the order, returns `None` if it was not present.
    pub fn remove_order(&mut self, order_hash: &OrderHash) -> Option<SignedOrder> {
        let signed_order = self.orders.remove(order_hash)?;
        let maker = signed_order.maker;

        if let Entry::Occupied(mut by_token) = self.dependent.entry(maker) {
            for token in [signed_order.maker_token_address, self.fee_token] {
                if let Entry::Occupied(mut bucket) = by_token.get_mut().entry(token) {
                    bucket.get_mut().remove(order_hash);
                    if bucket.get().is_empty() {
                        bucket.remove();
                    }
                }
            }
            if by_token.get().is_empty() {
                by_token.remove();
            }
        }
        Some(signed_order)
    }

    pub fn get_order(&self, order_hash: &OrderHash) -> Option<&SignedOrder> {
        self.orders.get(order_hash)
    }

    pub fn contains(&self, order_hash: &OrderHash) -> bool {
        self.orders.contains_key(order_hash)
    }

    /// Orders affected by a change of `maker`'s balance or proxy allowance
    /// of `token`.
    pub fn orders_dependent_on(&self, maker: Address, token: Address) -> BTreeSet<OrderHash> {
        self.dependent
            .get(&maker)
            .and_then(|by_token| by_token.get(&token))
            .cloned()
            .unwrap_or_default()
    }

    /// Tokens any watched order depends on.
    pub fn token_addresses(&self) -> BTreeSet<Address> {
        self.dependent
            .values()
            .flat_map(|by_token| by_token.keys().copied())
            .collect()
    }

    pub fn orders(&self) -> impl Iterator<Item = (&OrderHash, &SignedOrder)> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
