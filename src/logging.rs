//! Diagnostic logging setup.
//!
//! `RUST_LOG` controls verbosity, defaulting to `info`. This is the process's
//! own log; the per-request performance log lives in [`crate::perf_log`].

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
