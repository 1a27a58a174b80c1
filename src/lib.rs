//! WebSocket throttling reverse proxy library.
//!
//! Plain HTTP is forwarded to a single upstream. WebSocket connections are
//! promoted into raw streams whose upload and download byte rates are each
//! limited by a per-connection token bucket.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod throttle;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use throttle::{DuplexLimiter, LimiterPair, RateConfig, TokenBucket};
