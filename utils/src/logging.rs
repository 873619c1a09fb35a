// Logging infrastructure
//
// This will be used from multiple threads, so everything here goes
// through the global tracing dispatcher and holds no state of its own.
use tracing_subscriber::EnvFilter;

/// The filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info";

/// Install the process wide log subscriber.
///
/// The level is read from `RUST_LOG`. Calling this more than once is
/// fine, only the first call installs anything, so tests can call it
/// freely.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
