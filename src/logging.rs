//! Tracing subscriber setup for the command line tool.
//!
//! The library only emits events, installing a subscriber is up to the
//! binary embedding it.

use std::sync::Once;

use tracing::info;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human readable subscriber on stderr, filtered by `RUST_LOG`.
///
/// Only the first call has an effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .init();
        info!("tracing initialized");
    });
}

/// Same as [init_tracing] with one JSON object per event.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .init();
        info!("tracing initialized (json)");
    });
}
