//! Logging utilities for the Agent gateway.
//!
//! Provides structured JSON or human-readable logging through `tracing`.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tokio_util)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level.
//!
//! # Verbose Mode
//!
//! `logging.verbose` lifts the gateway's own targets to `debug` so every raw
//! backend line, parsed event and emitted delta shows up, whatever the base
//! level is.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
];

/// Targets raised to `debug` when verbose logging is on.
pub const VERBOSE_TARGETS: &[&str] = &["agent_gateway", "agent_common"];

/// Build the directive string for the env filter.
fn filter_directives(log_level: &str, verbose: bool) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    if verbose {
        for target in VERBOSE_TARGETS {
            directives.push_str(&format!(",{}=debug", target));
        }
    }

    directives
}

/// Build the default EnvFilter with noise suppression.
fn build_filter(log_level: &str, verbose: bool) -> EnvFilter {
    // Try environment variable first (allows override)
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(filter_directives(log_level, verbose))
}

/// Initialize logging with the given configuration.
///
/// `format` is "json" for structured JSON, anything else for pretty output.
/// Noisy modules are set to `warn` unless overridden via `RUST_LOG`.
pub fn init_logging(config: &LoggingConfig) {
    let filter = build_filter(&config.level, config.verbose);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        verbose = config.verbose,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}
