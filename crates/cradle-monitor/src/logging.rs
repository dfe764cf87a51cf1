//! Tracing setup.
//!
//! Colored human-readable output by default, JSON when `LOG_FORMAT=json`.

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cradle_models::DeviceId;

const DEFAULT_DIRECTIVES: &str = "cradle=info,ort=warn";

/// Install the global subscriber. Call once at startup.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Span carrying the device identity for everything the monitor logs.
pub fn device_span(device_id: &DeviceId) -> Span {
    tracing::info_span!("monitor", device_id = %device_id)
}

/// Span for one monitoring loop.
pub fn loop_span(name: &'static str) -> Span {
    tracing::info_span!("loop", name)
}
