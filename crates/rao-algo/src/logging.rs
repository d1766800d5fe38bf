//! Tracing setup for binaries and tests embedding the optimizer.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` when a global subscriber is already installed, so it is
/// safe to call from every test.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Same as [`init_tracing`] with an explicit filter directive, e.g. `rao_algo=debug`.
pub fn init_tracing_with(directives: &str) -> bool {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
