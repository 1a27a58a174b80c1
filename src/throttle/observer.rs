//! Observation hook for throttled connections.

use std::time::Duration;

use crate::throttle::error::WaitError;
use crate::throttle::pair::Direction;

/// Receives events from stream promotion and the duplex limiter.
///
/// Every method defaults to doing nothing, so implementors only override
/// the events they care about. Calls happen inline on the I/O path and
/// must not block.
pub trait ThrottleObserver: Send + Sync + 'static {
    /// A connection was promoted to a raw stream.
    fn promoted(&self, _upload_limited: bool, _download_limited: bool) {}

    /// A wait for `bytes` tokens completed after `waited`.
    fn throttled(&self, _direction: Direction, _bytes: usize, _waited: Duration) {}

    /// A wait for `bytes` tokens was aborted.
    fn wait_failed(&self, _direction: Direction, _bytes: usize, _error: &WaitError) {}

    /// `bytes` moved through the underlying stream.
    fn transferred(&self, _direction: Direction, _bytes: usize) {}

    /// The stream was shut down or dropped. Fires at most once.
    fn closed(&self) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ThrottleObserver for NoopObserver {}
