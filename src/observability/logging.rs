//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Pick the log level from the environment or the config
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over `observability.log_level`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    let level = config.log_level.to_ascii_lowercase();
    format!("ws_throttle_proxy={level},tower_http={level}")
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_follows_config_level() {
        let config = ObservabilityConfig {
            log_level: "DEBUG".into(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(
            default_filter(&config),
            "ws_throttle_proxy=debug,tower_http=debug"
        );
    }
}
