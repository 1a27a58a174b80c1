//! Bidirectional rate limiting for a promoted connection.
//!
//! # Data Flow
//! ```text
//! write(buf): wait for len(buf) download tokens → inner.write(buf)
//! read(buf):  inner.read(buf) → wait for n upload tokens → hand n bytes over
//! ```
//!
//! Writes are admitted before they reach the wire. Reads cannot know their
//! size in advance, so the wait comes after the bytes arrive and throttles how
//! fast the caller may keep draining the connection.
//!
//! Each direction keeps its own pending wait, so a stalled upload never holds
//! up a download and vice versa.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

use crate::net::conn::Conn;
use crate::throttle::bucket::TokenBucket;
use crate::throttle::context::ConnectionContext;
use crate::throttle::error::WaitError;
use crate::throttle::observer::{NoopObserver, ThrottleObserver};
use crate::throttle::pair::{Direction, LimiterPair};

type WaitFuture = Pin<Box<dyn Future<Output = Result<Duration, WaitError>> + Send>>;

/// A token wait in flight for one direction.
struct PendingWait {
    tokens: usize,
    future: WaitFuture,
}

impl PendingWait {
    fn new(bucket: &Arc<TokenBucket>, tokens: usize, ctx: &ConnectionContext) -> Self {
        let bucket = Arc::clone(bucket);
        let ctx = ctx.clone();
        Self {
            tokens,
            future: Box::pin(async move { bucket.wait_n(tokens, &ctx).await }),
        }
    }
}

/// Wraps a raw duplex stream and throttles reads and writes with a
/// [`LimiterPair`].
///
/// Everything other than reading and writing is delegated untouched. When
/// the inner stream implements [`Conn`], so does the limiter, which lets it
/// stand in for the raw connection.
pub struct DuplexLimiter<S> {
    inner: S,
    limiters: LimiterPair,
    ctx: ConnectionContext,
    observer: Arc<dyn ThrottleObserver>,
    write_wait: Option<PendingWait>,
    /// Download tokens already paid for but not yet written.
    write_credit: usize,
    read_wait: Option<PendingWait>,
    /// Bytes read from the wire whose upload wait has not released them yet.
    held: Vec<u8>,
    closed: bool,
}

impl<S> DuplexLimiter<S> {
    pub fn new(inner: S, limiters: LimiterPair, ctx: ConnectionContext) -> Self {
        Self {
            inner,
            limiters,
            ctx,
            observer: Arc::new(NoopObserver),
            write_wait: None,
            write_credit: 0,
            read_wait: None,
            held: Vec::new(),
            closed: false,
        }
    }

    /// Report throttling events to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ThrottleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn limiters(&self) -> &LimiterPair {
        &self.limiters
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.observer.closed();
        }
    }
}

impl<S> Drop for DuplexLimiter<S> {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl<S: AsyncRead + Unpin> DuplexLimiter<S> {
    fn poll_read_limited(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(wait) = self.read_wait.as_mut() {
            let result = ready!(wait.future.as_mut().poll(cx));
            let tokens = wait.tokens;
            self.read_wait = None;
            match result {
                Ok(waited) => self.observer.throttled(Direction::Upload, tokens, waited),
                Err(err) => {
                    self.held.clear();
                    return Poll::Ready(Err(self.wait_failed(Direction::Upload, tokens, err)));
                }
            }
        }

        if !self.held.is_empty() {
            let n = self.held.len().min(buf.remaining());
            buf.put_slice(&self.held[..n]);
            self.held.drain(..n);
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n == 0 {
            return Poll::Ready(Ok(()));
        }
        self.observer.transferred(Direction::Upload, n);

        let Some(bucket) = self.limiters.upload() else {
            return Poll::Ready(Ok(()));
        };
        let mut wait = PendingWait::new(bucket, n, &self.ctx);
        match wait.future.as_mut().poll(cx) {
            Poll::Ready(Ok(waited)) => {
                self.observer.throttled(Direction::Upload, n, waited);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                buf.set_filled(before);
                Poll::Ready(Err(self.wait_failed(Direction::Upload, n, err)))
            }
            Poll::Pending => {
                // The caller only owns the bytes once the wait is over.
                self.held.extend_from_slice(&buf.filled()[before..]);
                buf.set_filled(before);
                self.read_wait = Some(wait);
                Poll::Pending
            }
        }
    }

    fn wait_failed(&self, direction: Direction, tokens: usize, err: WaitError) -> io::Error {
        self.observer.wait_failed(direction, tokens, &err);
        err.into()
    }
}

impl<S: AsyncWrite + Unpin> DuplexLimiter<S> {
    fn poll_write_limited(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Some(bucket) = self.limiters.download() {
            // A wait left over from an abandoned write may cover fewer bytes
            // than `buf`, so keep reserving until the whole buffer is paid for.
            while !buf.is_empty() && self.write_credit < buf.len() {
                let needed = buf.len() - self.write_credit;
                let ctx = &self.ctx;
                let wait = self
                    .write_wait
                    .get_or_insert_with(|| PendingWait::new(bucket, needed, ctx));
                let result = ready!(wait.future.as_mut().poll(cx));
                let tokens = wait.tokens;
                self.write_wait = None;
                match result {
                    Ok(waited) => {
                        self.write_credit += tokens;
                        self.observer.throttled(Direction::Download, tokens, waited);
                    }
                    Err(err) => {
                        self.observer.wait_failed(Direction::Download, tokens, &err);
                        return Poll::Ready(Err(err.into()));
                    }
                }
            }
        }

        let n = ready!(Pin::new(&mut self.inner).poll_write(cx, buf))?;
        if self.limiters.download().is_some() {
            self.write_credit = self.write_credit.saturating_sub(n);
        }
        self.observer.transferred(Direction::Download, n);
        Poll::Ready(Ok(n))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DuplexLimiter<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().poll_read_limited(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DuplexLimiter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().poll_write_limited(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.inner).poll_shutdown(cx))?;
        this.mark_closed();
        Poll::Ready(Ok(()))
    }
}

impl<S: Conn> Conn for DuplexLimiter<S> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_read_deadline(deadline);
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_write_deadline(deadline);
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_deadline(deadline);
    }
}
