//! Reverse-index soundness across the caches: every key present in a primary
//! map is reachable through its reverse index within one valuation cycle of
//! the write.

use std::sync::Arc;
use std::time::Duration;
use valo_core::cache::{FxCache, PositionCache, PriceCache};
use valo_core::core::{now_ns, AssetClass, Currency, FxRate, PriceTick};
use valo_core::engine::{work_channel, DirtySet};
use valo_core::monitoring::ValoMetrics;

fn metrics() -> Arc<ValoMetrics> {
    Arc::new(ValoMetrics::new().unwrap())
}

#[test]
fn position_writes_are_reachable_through_holders() {
    let cache = PositionCache::new(metrics());

    for account_id in 0..100u64 {
        cache.set_quantity(account_id, account_id % 7, rust_decimal_macros::dec!(1));
    }

    for account_id in 0..100u64 {
        let product_id = account_id % 7;
        assert!(
            cache.accounts_holding(product_id).contains(&account_id),
            "account {account_id} missing from holders of {product_id}"
        );
    }
}

#[test]
fn fx_registration_is_reachable_through_ripple() {
    let m = metrics();
    let (work, rx) = work_channel(m.clone());
    let fx = FxCache::new(Currency::USD, work, m);

    for product_id in 0..50u64 {
        let currency = if product_id % 2 == 0 { "EUR" } else { "GBP" };
        fx.register_product_currency(product_id, currency.parse().unwrap());
    }

    let rippled = fx.put(FxRate {
        pair: "EURUSD".parse().unwrap(),
        rate: rust_decimal_macros::dec!(1.1),
        timestamp_ns: now_ns(),
    });

    // Every even product is EUR-denominated and must be enqueued
    assert_eq!(rippled, 25);
    let mut seen: Vec<u64> = rx.try_iter().map(|item| item.product_id).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).filter(|p| p % 2 == 0).collect::<Vec<_>>());
}

#[test]
fn price_put_registers_reachability_via_dirty_and_queue() {
    let m = metrics();
    let (work, rx) = work_channel(m.clone());
    let dirty = Arc::new(DirtySet::new(m.clone()));
    let cache = PriceCache::new(Duration::from_secs(1_800), work, dirty.clone(), m);

    for product_id in 0..20u64 {
        cache.put(PriceTick {
            product_id,
            price: rust_decimal_macros::dec!(1),
            currency: Currency::USD,
            asset_class: AssetClass::Equity,
            source: "TEST".into(),
            source_priority: 1,
            timestamp_ns: now_ns(),
            stale: false,
        });
    }

    assert_eq!(dirty.len(), 20);
    assert_eq!(rx.len(), 20);
}

#[test]
fn concurrent_writers_leave_index_sound() {
    let cache = Arc::new(PositionCache::new(metrics()));
    let mut handles = Vec::new();

    for t in 0..4u64 {
        let cache = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for i in 0..250u64 {
                let account_id = t * 1_000 + i;
                cache.set_quantity(account_id, i % 5, rust_decimal_macros::dec!(2));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Index agrees with the primary map after the dust settles
    let total: usize = (0..5).map(|p| cache.accounts_holding(p).len()).sum();
    assert_eq!(total, 1_000);
    assert_eq!(cache.len(), 1_000);
}

#[test]
fn removal_cleans_the_index() {
    let cache = PositionCache::new(metrics());
    cache.set_quantity(1, 10, rust_decimal_macros::dec!(5));
    cache.set_quantity(2, 10, rust_decimal_macros::dec!(5));

    cache.set_quantity(1, 10, rust_decimal::Decimal::ZERO);
    let holders = cache.accounts_holding(10);
    assert!(!holders.contains(&1));
    assert!(holders.contains(&2));
}
