//! Logging setup for the worker process.
//!
//! Unlike the native host library, this process owns its own stderr, so the
//! worker always installs a subscriber rather than leaving that to an
//! embedder - a crash dump is useless if nothing was ever logged.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber` fmt layer filtered by `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
