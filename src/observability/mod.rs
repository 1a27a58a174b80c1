//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Throttled connections report through:
//!     → metrics::MetricsObserver (debug traces + metrics)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows through request spans
//! - Throttle events reach observability through an injected hook, so the
//!   limiter itself has no logging or metrics dependency

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsObserver};
