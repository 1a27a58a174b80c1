//! Promotion of an upgraded HTTP connection into a throttled raw stream.
//!
//! # Responsibilities
//! - Hold the pending upgrade together with the rate limits it will get
//! - Build the connection's limiter pair and `DuplexLimiter` once the
//!   handshake completes
//!
//! # Design Decisions
//! - `LimitedUpgrade` replaces hyper's `OnUpgrade` in the request
//!   extensions, so the raw connection can only be reached through
//!   `promote`
//! - A failed promotion builds nothing and leaves nothing behind

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::net::conn::DeadlineStream;
use crate::throttle::{
    ConnectionContext, Direction, DuplexLimiter, LimiterPair, NoopObserver, RateConfig,
    ThrottleObserver,
};

/// Byte stream underneath a promoted connection.
pub trait RawIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawIo for T {}

/// The raw connection obtained from a promotion.
pub type RawStream = DeadlineStream<Box<dyn RawIo>>;

/// Error returned when a connection cannot be promoted.
#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("connection does not support promotion or was already promoted")]
    NotUpgradable,

    #[error("upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),
}

/// Result of a successful promotion.
pub struct Promoted {
    /// Rate limited raw connection.
    pub stream: DuplexLimiter<RawStream>,
    /// Bytes the HTTP layer buffered but did not consume.
    pub read_buf: Bytes,
}

/// A connection that has not been promoted yet, carrying the rate limits it
/// will be throttled with.
#[derive(Clone)]
pub struct LimitedUpgrade {
    on_upgrade: Option<OnUpgrade>,
    rate: RateConfig,
    ctx: ConnectionContext,
    observer: Arc<dyn ThrottleObserver>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl LimitedUpgrade {
    pub fn new(on_upgrade: Option<OnUpgrade>, rate: RateConfig, ctx: ConnectionContext) -> Self {
        Self {
            on_upgrade,
            rate,
            ctx,
            observer: Arc::new(NoopObserver),
            local_addr: None,
            peer_addr: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ThrottleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Addresses reported when the promoted I/O cannot supply its own.
    pub fn with_addrs(mut self, local_addr: Option<SocketAddr>, peer_addr: Option<SocketAddr>) -> Self {
        self.local_addr = local_addr;
        self.peer_addr = peer_addr;
        self
    }

    /// False when the underlying connection offered no upgrade.
    pub fn is_upgradable(&self) -> bool {
        self.on_upgrade.is_some()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Wait for the upgrade to complete and wrap the raw connection.
    ///
    /// Resolves once the switching-protocols response has been sent.
    pub async fn promote(self) -> Result<Promoted, PromoteError> {
        let on_upgrade = self.on_upgrade.ok_or(PromoteError::NotUpgradable)?;
        let upgraded = on_upgrade.await?;
        let (raw, read_buf) = into_raw(upgraded, self.local_addr, self.peer_addr);

        self.observer.promoted(
            self.rate.is_enabled(Direction::Upload),
            self.rate.is_enabled(Direction::Download),
        );

        let limiters = LimiterPair::new(&self.rate);
        let stream = DuplexLimiter::new(raw, limiters, self.ctx).with_observer(self.observer);
        Ok(Promoted { stream, read_buf })
    }
}

impl std::fmt::Debug for LimitedUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitedUpgrade")
            .field("upgradable", &self.is_upgradable())
            .field("rate", &self.rate)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Recover the socket when hyper hands it back untouched; otherwise keep
/// the opaque upgraded stream, which replays its own buffered bytes.
fn into_raw(
    upgraded: Upgraded,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
) -> (RawStream, Bytes) {
    match upgraded.downcast::<TokioIo<TcpStream>>() {
        Ok(parts) => {
            let tcp = parts.io.into_inner();
            let local_addr = tcp.local_addr().ok().or(local_addr);
            let peer_addr = tcp.peer_addr().ok().or(peer_addr);
            let io: Box<dyn RawIo> = Box::new(tcp);
            (DeadlineStream::new(io, local_addr, peer_addr), parts.read_buf)
        }
        Err(upgraded) => {
            let io: Box<dyn RawIo> = Box::new(TokioIo::new(upgraded));
            (DeadlineStream::new(io, local_addr, peer_addr), Bytes::new())
        }
    }
}
