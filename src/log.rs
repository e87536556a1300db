//! Optional logging bootstrap for binaries and demos.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber printing resolver messages.
///
/// Honors `RUST_LOG` and defaults to `info`, which shows cache hits and
/// computations while keeping bootstrap traffic (emitted at `debug`) quiet.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
