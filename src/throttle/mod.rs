//! Per-connection bandwidth throttling.
//!
//! # Data Flow
//! ```text
//! WebSocketRateLimitConfig
//!     → pair.rs (RateConfig::provision, once at startup)
//!     → pair.rs (LimiterPair::new, once per WebSocket connection)
//!     → duplex.rs (DuplexLimiter owns the pair for the connection's lifetime)
//!         → bucket.rs (wait_n per read / write)
//!         → context.rs (cancellation and deadline of the waits)
//!         → observer.rs (events for logging and metrics)
//! ```
//!
//! # Design Decisions
//! - No state is shared between connections; buckets die with their stream
//! - Upload and download never share a lock
//! - Waits are cancellable and give their tokens back when aborted

pub mod bucket;
pub mod context;
pub mod duplex;
pub mod error;
pub mod observer;
pub mod pair;

pub use bucket::TokenBucket;
pub use context::ConnectionContext;
pub use duplex::DuplexLimiter;
pub use error::WaitError;
pub use observer::{NoopObserver, ThrottleObserver};
pub use pair::{Direction, LimiterPair, RateConfig, DEFAULT_TIME_WINDOW_SECS};
