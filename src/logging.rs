//! Logging and tracing setup.
//!
//! The decoders only emit `tracing` events; installing a subscriber is left to
//! the embedding program. These helpers cover the common cases.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Subsequent calls,
/// including calls to [`init_tracing_json`], are ignored.
pub fn init_tracing() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        if installed.is_ok() {
            info!("binmeta tracing initialized");
        }
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        if installed.is_ok() {
            info!("binmeta tracing initialized (JSON mode)");
        }
    });
}
