//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Promoted connection
//!     → conn.rs (Conn capabilities, deadlines)
//!     → throttle::DuplexLimiter (rate limited view of the same Conn)
//!     → connection.rs (tunnel ids and live count)
//! ```
//!
//! # Design Decisions
//! - Every promoted stream exposes the same capabilities whatever its origin
//! - Each tunnel tracked so its lifetime shows up in logs and metrics

pub mod conn;
pub mod connection;

pub use conn::{Conn, DeadlineStream};
pub use connection::{ConnectionId, TunnelGuard, TunnelTracker};
