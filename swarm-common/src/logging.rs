//! Tracing setup shared by the three binaries.
//!
//! Everything goes to stderr: the compiler wrapper must leave stdout to the
//! compiler, and the viewer owns stdout for its table.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LOG_ENV;

/// Install the global subscriber. The filter comes from `SWARM_LOG`
/// (falling back to `info`, or `debug` when `verbose` is set).
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}
