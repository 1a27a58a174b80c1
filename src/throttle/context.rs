//! Cancellation scope shared by the token waits of one connection.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope handed down from the originating request.
///
/// Cloning is cheap and yields a handle on the same scope. Limiters only
/// observe it; the owner of the connection decides when it ends.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ConnectionContext {
    /// Create a context driven by `token` with no deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A context that is never cancelled and never times out.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Set the instant after which waits fail.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// End the scope, aborting every pending wait that observes it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn done_resolves_on_deadline() {
        let ctx = ConnectionContext::background().with_timeout(Duration::from_secs(5));
        let start = Instant::now();
        ctx.done().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(ctx.is_expired());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn clones_share_cancellation() {
        let ctx = ConnectionContext::background();
        let handle = ctx.clone();
        handle.cancel();
        ctx.done().await;
        assert!(ctx.is_cancelled());
    }
}
