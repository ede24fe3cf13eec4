use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use crate::types::OrderHash;

/// Orders ordered by expiration time.
///
/// An order counts as expired `margin` ahead of its actual expiration, which
/// leaves time to act on it before fills start failing.
#[derive(Clone, Debug, Default)]
pub struct ExpirationWatcher {
    margin_ms: u64,
    queue: BTreeSet<(u64, OrderHash)>,
    expirations: HashMap<OrderHash, u64>,
}

impl ExpirationWatcher {
    pub fn new(margin: Duration) -> Self {
        Self {
            margin_ms: u64::try_from(margin.as_millis()).unwrap_or(u64::MAX),
            ..Default::default()
        }
    }

    /// Tracks the order, replacing its previous expiration if any.
    pub fn add_order(&mut self, order_hash: OrderHash, expiration_ms: u64) {
        if let Some(previous) = self.expirations.insert(order_hash, expiration_ms) {
            self.queue.remove(&(previous, order_hash));
        }
        self.queue.insert((expiration_ms, order_hash));
    }

    pub fn remove_order(&mut self, order_hash: &OrderHash) {
        if let Some(expiration_ms) = self.expirations.remove(order_hash) {
            self.queue.remove(&(expiration_ms, *order_hash));
        }
    }

    /// Removes and returns orders expired at `now_ms`, earliest first.
    pub fn prune_expired(&mut self, now_ms: u64) -> Vec<OrderHash> {
        let deadline = now_ms.saturating_add(self.margin_ms);
        let mut expired = Vec::new();
        while let Some(&(expiration_ms, order_hash)) = self.queue.first() {
            if expiration_ms > deadline {
                break;
            }
            self.queue.pop_first();
            self.expirations.remove(&order_hash);
            expired.push(order_hash);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.expirations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty()
    }
}
