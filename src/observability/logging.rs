//! Structured logging.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level so operators can turn up
//!   verbosity without editing the config file
//! - JSON format for production, pretty format for development

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "gatekeeper=info,tower_http=info";

/// Resolve the effective filter directive.
pub fn filter_directive(config: &ObservabilityConfig) -> String {
    match config.log_level.as_deref() {
        Some(level) if !level.trim().is_empty() => level.trim().to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
