//! Errors raised while waiting for tokens.

use std::io;
use std::time::Duration;

/// Why a token wait did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The connection context was cancelled while waiting.
    #[error("connection context cancelled while waiting for {requested} tokens")]
    Cancelled { requested: usize },

    /// The wait would end after the connection context deadline.
    #[error("waiting {wait:?} for {requested} tokens would exceed the connection deadline")]
    DeadlineExceeded { requested: usize, wait: Duration },

    /// The bucket never refills and cannot cover the request.
    #[error("bucket cannot supply {requested} tokens (capacity {capacity}, no refill)")]
    Exhausted { requested: usize, capacity: u64 },
}

impl WaitError {
    /// Recover the wait error carried by an I/O error produced by the limiter.
    ///
    /// Returns `None` for genuine transport errors.
    pub fn from_io(err: &io::Error) -> Option<&WaitError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<WaitError>())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WaitError::Cancelled { .. } => "cancelled",
            WaitError::DeadlineExceeded { .. } => "deadline",
            WaitError::Exhausted { .. } => "exhausted",
        }
    }
}

impl From<WaitError> for io::Error {
    fn from(err: WaitError) -> Self {
        let kind = match err {
            WaitError::Cancelled { .. } => io::ErrorKind::ConnectionAborted,
            WaitError::DeadlineExceeded { .. } => io::ErrorKind::TimedOut,
            WaitError::Exhausted { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
