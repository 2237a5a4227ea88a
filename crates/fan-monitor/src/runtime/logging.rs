use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,fan_monitor=debug,fan_core=debug,fan_io=debug";

/// Install the global subscriber with optional JSON output. Records from the
/// `log` facade used by `fan-core` are forwarded into it.
pub fn init_tracing(json_output: bool) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let output = if json_output {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
}
