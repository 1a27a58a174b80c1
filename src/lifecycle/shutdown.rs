//! Shutdown coordination for the proxy.

use tokio_util::sync::CancellationToken;

use crate::throttle::ConnectionContext;

/// Coordinator for graceful shutdown.
///
/// Owns the root cancellation token. Every connection context is derived
/// from it, so triggering shutdown aborts all pending token waits.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh connection context scoped under this coordinator.
    ///
    /// Cancelling the context leaves the coordinator untouched.
    pub fn connection_context(&self) -> ConnectionContext {
        ConnectionContext::new(self.token.child_token())
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cancels_connection_contexts() {
        let shutdown = Shutdown::new();
        let ctx = shutdown.connection_context();
        let other = shutdown.connection_context();

        other.cancel();
        assert!(!shutdown.is_triggered());
        assert!(!ctx.is_cancelled());

        shutdown.trigger();
        ctx.done().await;
        shutdown.wait().await;
        assert!(ctx.is_cancelled());
    }
}
