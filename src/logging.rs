//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise this crate logs at `log_level` and
//! everything else at info.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chain_dispatch={},info", log_level).into())
}

/// Install the global tracing subscriber
pub fn init(log_level: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(log_level));

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
