//! Hot-path benchmarks: strategy arithmetic and conflation submit.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;
use std::sync::Arc;
use valo_core::core::{now_ns, AssetClass, Currency, PriceTick, Valuation};
use valo_core::engine::{
    naive_market_value, CollectingSink, ConflationBroadcaster, PricingStrategy,
};
use valo_core::intake::CollectingDlq;
use valo_core::monitoring::ValoMetrics;
use valo_core::resilience::BackoffConfig;
use valo_strategies::EquityFxFastPath;

fn tick() -> PriceTick {
    PriceTick {
        product_id: 42,
        price: dec!(123.456789),
        currency: Currency::USD,
        asset_class: AssetClass::Equity,
        source: "BENCH".into(),
        source_priority: 1,
        timestamp_ns: now_ns(),
        stale: false,
    }
}

fn strategy_paths(c: &mut Criterion) {
    let t = tick();
    let quantity = dec!(10000.25);
    let fx_rate = dec!(1.2345);

    c.bench_function("fast_path_market_value", |b| {
        let strategy = EquityFxFastPath;
        b.iter(|| {
            strategy
                .market_value(black_box(quantity), black_box(&t), black_box(fx_rate))
                .unwrap()
        })
    });

    c.bench_function("naive_market_value", |b| {
        b.iter(|| {
            naive_market_value(black_box(quantity), black_box(t.price), black_box(fx_rate))
                .unwrap()
        })
    });
}

fn conflation_submit(c: &mut Criterion) {
    let broadcaster = ConflationBroadcaster::new(
        Arc::new(CollectingSink::new()),
        Arc::new(CollectingDlq::new()),
        Arc::new(ValoMetrics::new().unwrap()),
        BackoffConfig::with_max_retries(0),
    );

    c.bench_function("conflation_submit", |b| {
        let mut computed_at = 0u64;
        b.iter(|| {
            computed_at += 1;
            broadcaster.submit(Valuation {
                account_id: computed_at % 64,
                product_id: computed_at % 512,
                market_value: dec!(1000.5),
                price_used: dec!(10.5),
                fx_rate_used: dec!(1.1),
                source: "BENCH".into(),
                computed_at,
            })
        })
    });
}

criterion_group!(benches, strategy_paths, conflation_submit);
criterion_main!(benches);
