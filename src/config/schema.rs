//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the throttling proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream server that receives all proxied traffic.
    pub upstream: UpstreamConfig,

    /// Per-connection WebSocket bandwidth limits.
    pub websocket_rate_limit: WebSocketRateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// WebSocket rate limit options as written by the operator.
///
/// Rates are bytes per `time_window` seconds. A zero burst disables limiting
/// for that direction. These raw values are turned into a
/// [`RateConfig`](crate::throttle::RateConfig) at provisioning time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketRateLimitConfig {
    /// Byte budget per window for client -> server traffic.
    pub up_byte_rate: u64,

    /// Upload burst size in bytes (0 disables upload limiting).
    pub up_burst_limit: u64,

    /// Byte budget per window for server -> client traffic.
    pub down_byte_rate: u64,

    /// Download burst size in bytes (0 disables download limiting).
    pub down_burst_limit: u64,

    /// Window length in seconds (0 means the default of 60).
    pub time_window: u64,

    /// Deadline for the connection context of each WebSocket session,
    /// in seconds (0 = no deadline).
    pub session_timeout_secs: u64,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout for ordinary HTTP requests in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.timeouts.connect_secs, 5);
        assert_eq!(config.websocket_rate_limit, WebSocketRateLimitConfig::default());
    }

    #[test]
    fn rate_limit_section_parses() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [websocket_rate_limit]
            up_byte_rate = 1000
            up_burst_limit = 100
            time_window = 10
            "#,
        )
        .unwrap();

        let limits = &config.websocket_rate_limit;
        assert_eq!(limits.up_byte_rate, 1000);
        assert_eq!(limits.up_burst_limit, 100);
        assert_eq!(limits.down_burst_limit, 0);
        assert_eq!(limits.time_window, 10);
    }
}
