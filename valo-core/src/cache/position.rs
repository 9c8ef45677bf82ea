//! Position hot cache: (account, product) -> signed quantity, with the
//! product -> accounts reverse index used by the valuation fan-out.
//!
//! Quantities are held per account so an EOD snapshot replaces one account's
//! holdings atomically: readers see either the whole prior snapshot or the
//! whole new one. Zero quantity means absent; the two are equivalent to the
//! valuation core.

use crate::cache::ReverseIndex;
use crate::core::{AccountId, ProductId};
use crate::monitoring::ValoMetrics;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct PositionCache {
    holdings: DashMap<AccountId, HashMap<ProductId, Decimal>>,
    holders: ReverseIndex<ProductId, AccountId>,
    entry_count: AtomicI64,
    metrics: Arc<ValoMetrics>,
}

impl PositionCache {
    pub fn new(metrics: Arc<ValoMetrics>) -> Self {
        Self {
            holdings: DashMap::new(),
            holders: ReverseIndex::new(),
            entry_count: AtomicI64::new(0),
            metrics,
        }
    }

    /// Set the quantity for one (account, product). Zero removes the entry.
    pub fn set_quantity(&self, account_id: AccountId, product_id: ProductId, quantity: Decimal) {
        if quantity == Decimal::ZERO {
            let mut removed = false;
            if let Some(mut entry) = self.holdings.get_mut(&account_id) {
                removed = entry.remove(&product_id).is_some();
            }
            if removed {
                self.holdings.remove_if(&account_id, |_, map| map.is_empty());
                self.adjust_count(-1);
                // Index follows the primary write
                self.holders.remove(&product_id, &account_id);
            }
            return;
        }

        let previous = self
            .holdings
            .entry(account_id)
            .or_default()
            .insert(product_id, quantity);
        if previous.is_none() {
            self.adjust_count(1);
        }
        self.holders.insert(product_id, account_id);
    }

    /// Quantity held, zero when absent.
    pub fn quantity(&self, account_id: AccountId, product_id: ProductId) -> Decimal {
        self.holdings
            .get(&account_id)
            .and_then(|entry| entry.get(&product_id).copied())
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of the accounts currently holding `product_id`.
    pub fn accounts_holding(&self, product_id: ProductId) -> HashSet<AccountId> {
        self.holders.get(&product_id)
    }

    /// Replace one account's holdings wholesale (EOD snapshot application).
    ///
    /// The swap is atomic at the account level; the reverse index is fixed up
    /// afterwards, so a concurrent fan-out may briefly miss the delta - it is
    /// corrected on the next relevant tick.
    pub fn bulk_replace(&self, account_id: AccountId, positions: Vec<(ProductId, Decimal)>) {
        let fresh: HashMap<ProductId, Decimal> = positions
            .into_iter()
            .filter(|(_, quantity)| *quantity != Decimal::ZERO)
            .collect();

        let fresh_keys: HashSet<ProductId> = fresh.keys().copied().collect();
        let fresh_len = fresh.len() as i64;

        let prior = if fresh.is_empty() {
            self.holdings.remove(&account_id).map(|(_, map)| map)
        } else {
            self.holdings.insert(account_id, fresh)
        };
        let prior_keys: HashSet<ProductId> = prior
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();

        self.adjust_count(fresh_len - prior_keys.len() as i64);

        for gone in prior_keys.difference(&fresh_keys) {
            self.holders.remove(gone, &account_id);
        }
        for added in fresh_keys.difference(&prior_keys) {
            self.holders.insert(*added, account_id);
        }

        debug!(
            account_id,
            replaced = prior_keys.len(),
            now = fresh_keys.len(),
            "account snapshot applied"
        );
    }

    /// Total (account, product) entries.
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn adjust_count(&self, delta: i64) {
        let count = self.entry_count.fetch_add(delta, Ordering::AcqRel) + delta;
        self.metrics.system().position_cache_size.set(count.max(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cache() -> PositionCache {
        PositionCache::new(Arc::new(ValoMetrics::new().unwrap()))
    }

    #[test]
    fn set_and_read_back() {
        let cache = cache();
        cache.set_quantity(7, 42, dec!(100));
        cache.set_quantity(7, 43, dec!(-50));

        assert_eq!(cache.quantity(7, 42), dec!(100));
        assert_eq!(cache.quantity(7, 43), dec!(-50));
        assert_eq!(cache.quantity(7, 99), Decimal::ZERO);
        assert_eq!(cache.quantity(8, 42), Decimal::ZERO);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_removes_and_unindexes() {
        let cache = cache();
        cache.set_quantity(7, 42, dec!(100));
        assert!(cache.accounts_holding(42).contains(&7));

        cache.set_quantity(7, 42, Decimal::ZERO);
        assert_eq!(cache.quantity(7, 42), Decimal::ZERO);
        assert!(cache.accounts_holding(42).is_empty());
        assert_eq!(cache.len(), 0);

        // Removing an absent entry is a no-op
        cache.set_quantity(7, 42, Decimal::ZERO);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn holders_accumulate_across_accounts() {
        let cache = cache();
        cache.set_quantity(1, 42, dec!(10));
        cache.set_quantity(2, 42, dec!(20));
        cache.set_quantity(3, 42, dec!(30));
        cache.set_quantity(2, 42, dec!(25)); // update, not a new holder

        let holders = cache.accounts_holding(42);
        assert_eq!(holders.len(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn bulk_replace_swaps_whole_account() {
        let cache = cache();
        cache.set_quantity(7, 1, dec!(10));
        cache.set_quantity(7, 2, dec!(20));
        cache.set_quantity(8, 1, dec!(99));

        cache.bulk_replace(7, vec![(2, dec!(21)), (3, dec!(30)), (4, Decimal::ZERO)]);

        assert_eq!(cache.quantity(7, 1), Decimal::ZERO);
        assert_eq!(cache.quantity(7, 2), dec!(21));
        assert_eq!(cache.quantity(7, 3), dec!(30));
        assert_eq!(cache.quantity(7, 4), Decimal::ZERO);

        // Other accounts untouched
        assert_eq!(cache.quantity(8, 1), dec!(99));

        // Index reflects the swap
        assert!(!cache.accounts_holding(1).contains(&7));
        assert!(cache.accounts_holding(1).contains(&8));
        assert!(cache.accounts_holding(3).contains(&7));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn bulk_replace_with_empty_clears_account() {
        let cache = cache();
        cache.set_quantity(7, 1, dec!(10));
        cache.bulk_replace(7, vec![]);

        assert_eq!(cache.quantity(7, 1), Decimal::ZERO);
        assert!(cache.accounts_holding(1).is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn concurrent_deltas_and_snapshots() {
        let cache = Arc::new(cache());
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    cache.set_quantity(1, i % 10, Decimal::from(i + 1));
                }
            })
        };
        let snapshotter = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    cache.bulk_replace(2, vec![(1, dec!(5)), (2, dec!(6))]);
                }
            })
        };
        writer.join().unwrap();
        snapshotter.join().unwrap();

        // Account 2 converged on exactly its final snapshot
        assert_eq!(cache.quantity(2, 1), dec!(5));
        assert_eq!(cache.quantity(2, 2), dec!(6));
        assert_eq!(cache.accounts_holding(1).len(), 2);
    }
}
