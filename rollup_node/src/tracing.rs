//! Tracing setup for the role binaries.

use clap::ValueEnum;
use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// How log lines are rendered.
#[derive(ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines, for a terminal. The aggregator driver is a
    /// run-and-exit tool, so this is the default.
    #[default]
    Text,
    /// Line-delimited JSON, for a collector scraping a long-lived daemon
    /// such as the challenger.
    Json,
}

/// Installs the global subscriber. Filtering comes from `RUST_LOG`.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::from_default_env();
    let fmt = tracing_subscriber::fmt::layer().with_ansi(false);

    match format {
        LogFormat::Text => tracing_subscriber::Registry::default()
            .with(fmt.with_filter(filter))
            .init(),
        LogFormat::Json => tracing_subscriber::Registry::default()
            .with(fmt.json().with_filter(filter))
            .init(),
    }
}
