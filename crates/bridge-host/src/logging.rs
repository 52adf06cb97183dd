//! Logging setup for the native host library.
//!
//! A host-embedded DAW plugin doesn't get to print to a terminal, so this
//! just wires up `tracing_subscriber`'s env-filter the way a standalone
//! binary would via `RUST_LOG` - callers embedding this as a shared
//! library are expected to install their own subscriber instead and can
//! skip calling [`init`] entirely.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber` fmt layer filtered by `RUST_LOG`,
/// defaulting to `info` when unset. Safe to call more than once; only the
/// first call takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
