//! Bootstrap utilities for the ringrelay binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the tracing filter.
pub const LOG_ENV_VAR: &str = "RINGRELAY_LOG";

/// Initialize tracing with the RINGRELAY_LOG environment variable.
///
/// Defaults to "info" level if RINGRELAY_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Pull `--config <path>` (or `--config=<path>`) out of the argument list.
///
/// Returns the path, if any, and the remaining arguments in order.
pub fn parse_config_path(args: Vec<String>) -> (Option<String>, Vec<String>) {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" {
            config = iter.next();
        } else if let Some(path) = arg.strip_prefix("--config=") {
            config = Some(path.to_string());
        } else {
            rest.push(arg);
        }
    }

    (config, rest)
}
