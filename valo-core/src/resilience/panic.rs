//! Global panic hook.
//!
//! A panic anywhere in the engine is unrecoverable cache corruption from the
//! caller's point of view. The hook logs location and message through
//! tracing, then delegates to the default hook so the process still dies.

use std::panic;
use tracing::error;

/// Install the global panic hook. Call once, early in `main`.
pub fn install_panic_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        error!(%location, %message, "engine panicked");

        default_hook(panic_info);
    }));
}
