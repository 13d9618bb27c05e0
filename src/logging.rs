//! `tracing` subscriber setup for the `vsync` binary.
//!
//! Logs go to stderr so stdout stays parseable. `RUST_LOG` overrides the
//! default filter.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "vaultsync=info,vaultsync_core=info";

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "vaultsync=debug,vaultsync_core=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
