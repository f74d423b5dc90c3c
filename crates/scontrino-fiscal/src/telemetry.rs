//! Tracing bootstrap for processes embedding the fiscal engine.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,scontrino=debug,sqlx=warn";

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// Set via the `RUST_LOG` environment variable:
/// - `RUST_LOG=debug` - Show all debug logs
/// - `RUST_LOG=scontrino=trace` - Show trace for scontrino crates only
/// - Default: [`DEFAULT_FILTER`]
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
