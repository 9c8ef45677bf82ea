//! Replay engine: drives the full pipeline with a synthetic feed.
//!
//! Generates positions, FX rates, and a random-walk price stream, pushes
//! them through the in-process broker, and reports what came out the other
//! end. Useful for smoke-testing the pipeline and eyeballing conflation
//! behavior without a broker.

use clap::Parser;
use rand::Rng;
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use valo_bins::common::{init_logging, pin_to_core, print_stats, CommonArgs};
use valo_core::core::errors::exit_codes;
use valo_core::core::now_ns;
use valo_core::engine::{CollectingSink, Engine, InMemoryColdStore, NullSnapshot};
use valo_core::intake::{in_process_feed, CollectingDlq, RecordBatch, Topic};
use valo_core::resilience::install_panic_handler;
use valo_core::EngineConfig;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Replay arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Number of accounts
    #[arg(long, default_value = "20")]
    accounts: u64,

    /// Number of products
    #[arg(long, default_value = "50")]
    products: u64,

    /// Price ticks to generate
    #[arg(long, default_value = "10000")]
    ticks: u64,

    /// How long to let the pipeline drain after the last tick
    #[arg(long, default_value = "2")]
    drain_secs: u64,
}

const CURRENCIES: [&str; 4] = ["USD", "EUR", "GBP", "JPY"];

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.common.log_level, args.common.json_logs) {
        eprintln!("logging init failed: {e}");
        return ExitCode::from(exit_codes::CONFIG as u8);
    }
    install_panic_handler();

    info!("=== Valo: replay run ===");
    info!(
        accounts = args.accounts,
        products = args.products,
        ticks = args.ticks,
        "generating synthetic load"
    );

    let config = EngineConfig::default();
    let sink = Arc::new(CollectingSink::new());
    let cold_store = Arc::new(InMemoryColdStore::new());
    let dlq = Arc::new(CollectingDlq::new());

    let mut engine = match Engine::new(
        config,
        Arc::new(valo_strategies::default_registry()),
        sink.clone(),
        cold_store.clone(),
        dlq.clone(),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine construction failed: {e}");
            return ExitCode::from(exit_codes::CONFIG as u8);
        }
    };
    if let Err(e) = engine.warm_from(&NullSnapshot) {
        error!("warm-up failed: {e}");
        return ExitCode::from(exit_codes::CONFIG as u8);
    }

    pin_to_core(args.common.cpu_core);
    engine.start();

    let (price_tx, price_consumer) = in_process_feed("prices.ticks");
    let (fx_tx, fx_consumer) = in_process_feed("fx.rates");
    let (position_tx, position_consumer) = in_process_feed("positions.updates");
    engine.spawn_intake(Box::new(price_consumer));
    engine.spawn_intake(Box::new(fx_consumer));
    engine.spawn_intake(Box::new(position_consumer));

    let mut rng = rand::thread_rng();
    let mut offset = 0u64;

    // Seed positions: each account holds a random slice of the universe
    for account_id in 0..args.accounts {
        for product_id in 0..args.products {
            if rng.gen_bool(0.3) {
                let quantity = rng.gen_range(1..10_000);
                let payload = serde_json::to_vec(&json!({
                    "accountId": account_id,
                    "productId": product_id,
                    "quantity": quantity.to_string(),
                }))
                .expect("static shape");
                let _ = position_tx.send(RecordBatch::single(
                    Topic::PositionUpdates,
                    offset,
                    Some(account_id.to_string()),
                    payload,
                ));
                offset += 1;
            }
        }
    }

    // Seed FX rates against the base
    for (i, pair) in ["EURUSD", "GBPUSD", "USDJPY"].iter().enumerate() {
        let rate = [1.10, 1.27, 148.5][i];
        let payload = serde_json::to_vec(&json!({
            "pair": pair,
            "rate": rate.to_string(),
            "timestamp": now_ns(),
        }))
        .expect("static shape");
        let _ = fx_tx.send(RecordBatch::single(
            Topic::FxRates,
            offset,
            Some((*pair).to_string()),
            payload,
        ));
        offset += 1;
    }

    // Random-walk price stream
    let mut prices: Vec<f64> = (0..args.products)
        .map(|_| rng.gen_range(10.0..500.0))
        .collect();
    for i in 0..args.ticks {
        let product_id = rng.gen_range(0..args.products);
        let step = rng.gen_range(-0.5..0.5);
        prices[product_id as usize] = (prices[product_id as usize] + step).max(0.01);
        let currency = CURRENCIES[(product_id % CURRENCIES.len() as u64) as usize];

        let payload = serde_json::to_vec(&json!({
            "productId": product_id,
            "price": format!("{:.4}", prices[product_id as usize]),
            "currency": currency,
            "assetClass": "EQUITY",
            "source": "REPLAY",
            "sourcePriority": 1,
            "timestamp": now_ns(),
        }))
        .expect("static shape");
        let _ = price_tx.send(RecordBatch::single(
            Topic::PriceTicks,
            offset,
            Some(product_id.to_string()),
            payload,
        ));
        offset += 1;

        if i % 1_000 == 0 && i > 0 {
            info!(sent = i, "price ticks in flight");
        }
    }

    std::thread::sleep(Duration::from_secs(args.drain_secs));

    let outcome = engine.shutdown();
    print_stats(&engine.stats());

    let emissions = sink.take();
    let total: usize = emissions.iter().map(|(_, batch)| batch.len()).sum();
    info!(
        batches = emissions.len(),
        valuations = total,
        dlq = dlq.len(),
        coldstore = cold_store.appended(),
        "replay complete"
    );

    match outcome {
        valo_core::engine::ShutdownOutcome::Graceful => ExitCode::from(exit_codes::OK as u8),
        valo_core::engine::ShutdownOutcome::Forced => {
            ExitCode::from(exit_codes::FORCED_SHUTDOWN as u8)
        }
    }
}
