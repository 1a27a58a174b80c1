//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → middleware/ws_rate_limit.rs (WebSocket? attach LimitedUpgrade)
//!     → server.rs proxy handler
//!         plain HTTP → forwarded to upstream
//!         WebSocket  → websocket.rs (replay handshake upstream)
//!                         → upgrade.rs (promote into DuplexLimiter)
//!                         → bidirectional copy
//! ```

pub mod middleware;
pub mod request;
pub mod server;
pub mod upgrade;
pub mod websocket;

pub use middleware::{ws_rate_limit_middleware, WebSocketRateLimit};
pub use request::{is_websocket_request, X_REQUEST_ID};
pub use server::HttpServer;
pub use upgrade::{LimitedUpgrade, PromoteError, Promoted, RawStream};
