//! Structured logging setup

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize the tracing subscriber
///
/// Only the first call per process has an effect. `RUST_LOG` takes
/// precedence over `default_level` when set.
///
/// # Examples
///
/// ```no_run
/// switchboard::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

fn default_directives(level: &str) -> String {
    format!("switchboard={},tower_http=debug", level)
}
