//! Request middleware.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → ws_rate_limit.rs (WebSocket? swap OnUpgrade for LimitedUpgrade)
//!     → handler
//! ```

pub mod ws_rate_limit;

pub use ws_rate_limit::{ws_rate_limit_middleware, WebSocketRateLimit};
