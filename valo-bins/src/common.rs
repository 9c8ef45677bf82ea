//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use valo_core::engine::EngineStats;

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to a JSON config file (defaults + env overrides otherwise)
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// CPU core to pin the intake loops to
    #[arg(short = 'c', long)]
    pub cpu_core: Option<usize>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    pub json_logs: bool,
}

/// Initialize tracing/logging
pub fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Pin the current thread to a CPU core, when requested.
pub fn pin_to_core(cpu_core: Option<usize>) {
    let Some(core) = cpu_core else { return };
    let Some(core_ids) = core_affinity::get_core_ids() else {
        tracing::warn!("cannot enumerate CPU cores, pinning skipped");
        return;
    };
    match core_ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            tracing::info!(core, "pinned to CPU core");
        }
        _ => tracing::warn!(core, "failed to pin to CPU core"),
    }
}

/// Print final statistics
pub fn print_stats(stats: &EngineStats) {
    tracing::info!("=== Final Statistics ===");
    tracing::info!("Ticks received: {}", stats.ticks_received);
    tracing::info!("Parse errors: {}", stats.parse_errors);
    tracing::info!("Valuations submitted: {}", stats.valuations_submitted);
    tracing::info!("Conflated away: {}", stats.dropped_by_conflation);
    tracing::info!("Batches emitted: {}", stats.batches_emitted);
    tracing::info!("Shard skipped: {}", stats.shard_skipped);
    tracing::info!("DLQ offers: {}", stats.dlq_offers);
    tracing::info!("Cold-store appends: {}", stats.coldstore_appends);

    if stats.valuations_submitted > 0 {
        let conflation_rate =
            stats.dropped_by_conflation as f64 / stats.valuations_submitted as f64 * 100.0;
        tracing::info!("Conflation rate: {:.2}%", conflation_rate);
    }
}
