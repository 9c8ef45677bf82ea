//! Live valuation engine.
//!
//! Connects one intake loop per topic to the broker named by the config (or
//! `BOOTSTRAP_SERVERS`), appends winning ticks to a JSONL cold store, and
//! logs each conflated batch to its subscriber topic. Exit codes: 0 normal,
//! 1 fatal configuration error, 2 forced shutdown, 3 broker unreachable at
//! startup.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use valo_bins::common::{init_logging, pin_to_core, print_stats, CommonArgs};
use valo_core::core::errors::exit_codes;
use valo_core::engine::{Engine, JsonlColdStore, NullSnapshot, TracingSink};
use valo_core::intake::tcp::TcpRecordFeed;
use valo_core::intake::{LoggingDlq, Topic};
use valo_core::monitoring::{MonitoringServer, MonitoringServerConfig};
use valo_core::resilience::install_panic_handler;
use valo_core::EngineConfig;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Live engine arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Cold price store file
    #[arg(long, default_value = "./data/prices.jsonl")]
    cold_store: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.common.log_level, args.common.json_logs) {
        eprintln!("logging init failed: {e}");
        return ExitCode::from(exit_codes::CONFIG as u8);
    }
    install_panic_handler();

    info!("=== Valo: Real-Time Valuation Engine ===");

    let config = match EngineConfig::load(args.common.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(exit_codes::CONFIG as u8);
        }
    };

    let cold_store = match JsonlColdStore::open(&args.cold_store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("cold store error: {e}");
            return ExitCode::from(exit_codes::CONFIG as u8);
        }
    };

    let mut engine = match Engine::new(
        config.clone(),
        Arc::new(valo_strategies::default_registry()),
        Arc::new(TracingSink),
        cold_store,
        Arc::new(LoggingDlq),
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

    // One consumer per topic; broker unreachable within the retry window is
    // exit code 3.
    let addr = config.broker.bootstrap_servers.clone();
    let window = Duration::from_millis(config.broker.startup_retry_window_ms);
    let mut consumers = Vec::new();
    for topic in Topic::ALL {
        match TcpRecordFeed::connect_with_retry(&addr, topic.as_str(), window) {
            Ok(feed) => consumers.push(Box::new(feed)),
            Err(e) => {
                error!(topic = topic.as_str(), "broker unreachable: {e}");
                return ExitCode::from(exit_codes::BROKER_UNREACHABLE as u8);
            }
        }
    }

    let monitoring = MonitoringServer::new(
        MonitoringServerConfig {
            listen_addr: match config.metrics.addr.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    error!("bad metrics.addr {}: {e}", config.metrics.addr);
                    return ExitCode::from(exit_codes::CONFIG as u8);
                }
            },
            metrics_path: config.metrics.path.clone(),
        },
        engine.metrics(),
        engine.health(),
    );
    if let Err(e) = monitoring.spawn() {
        error!("monitoring server failed to start: {e}");
        return ExitCode::from(exit_codes::CONFIG as u8);
    }

    pin_to_core(args.common.cpu_core);

    engine.start();
    for consumer in consumers {
        engine.spawn_intake(consumer);
    }

    // Block until ctrl-c flips the shutdown flag
    let flag = engine.shutdown_flag();
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = done_tx.send(());
    }) {
        error!("signal handler: {e}");
        flag.store(true, std::sync::atomic::Ordering::Release);
    }
    let _ = done_rx.recv();
    info!("signal received, draining");

    let outcome = engine.shutdown();
    print_stats(&engine.stats());

    match outcome {
        valo_core::engine::ShutdownOutcome::Graceful => ExitCode::from(exit_codes::OK as u8),
        valo_core::engine::ShutdownOutcome::Forced => {
            ExitCode::from(exit_codes::FORCED_SHUTDOWN as u8)
        }
    }
}
