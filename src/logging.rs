//! tracing-subscriber setup for the CLI.
//!
//! Logs go to stderr so stdout stays clean for results (`--json`).

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is unset: the configured directive, or `debug` for `-v`.
pub fn build_filter(configured: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("devpulse=debug,info")
        } else {
            EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(format: LogFormat, configured_filter: &str, verbose: bool) -> Result<()> {
    let filter = build_filter(configured_filter, verbose);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}
