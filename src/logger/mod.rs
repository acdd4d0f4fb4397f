//! Diagnostic logging: `tracing` events rendered to stderr.
//!
//! Step reports go to stdout; everything emitted here is diagnostics, so
//! piping `wmdeploy --json` output stays machine-readable.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding an `EnvFilter` directive, e.g. `debug`.
pub const LOG_ENV: &str = "WMDEPLOY_LOG";

/// Default filter directive for a verbosity setting.
#[must_use]
pub const fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "webmonitor_deploy=debug,info"
    } else {
        "webmonitor_deploy=warn"
    }
}

/// Install the global subscriber. `WMDEPLOY_LOG` overrides the verbosity
/// flag; `json` switches to one JSON object per event. Calling this twice
/// is harmless; the second subscriber is ignored.
pub fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer.compact()).try_init()
    };
    if let Err(err) = result {
        tracing::debug!(%err, "logging already initialized");
    }
}
