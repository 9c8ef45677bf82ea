//! Resilience building blocks: retry backoff and the global panic hook.

pub mod backoff;
pub mod panic;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use panic::install_panic_handler;
