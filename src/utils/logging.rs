use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins; otherwise `default_filter`
/// applies. Logs go to stderr so command output on stdout stays parseable.
/// Targets are kept so `audit` events stand out.
pub fn init(default_filter: &str) {
    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
