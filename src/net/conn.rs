//! Raw duplex stream capabilities.
//!
//! # Responsibilities
//! - Describe what a promoted connection offers beyond bytes (`Conn`)
//! - Provide read/write deadlines for streams that lack them
//!
//! # Design Decisions
//! - Close is `AsyncWrite::poll_shutdown` or drop; no separate method
//! - Deadlines are absolute instants; `None` clears them
//! - An expired deadline fails every pending and future operation in that
//!   direction until it is moved or cleared

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

/// A raw, full-duplex connection.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Fail reads once `deadline` passes.
    fn set_read_deadline(&mut self, deadline: Option<Instant>);

    /// Fail writes once `deadline` passes.
    fn set_write_deadline(&mut self, deadline: Option<Instant>);

    /// Set both the read and the write deadline.
    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }
}

/// Adds addresses and deadlines to any async byte stream.
pub struct DeadlineStream<S> {
    inner: S,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> DeadlineStream<S> {
    /// Wrap `inner`, reporting the given addresses.
    pub fn new(inner: S, local_addr: Option<SocketAddr>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            inner,
            local_addr,
            peer_addr,
            read_deadline: None,
            write_deadline: None,
        }
    }
}

impl DeadlineStream<TcpStream> {
    /// Wrap a TCP stream, taking its addresses from the socket.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self::new(stream, Some(local_addr), Some(peer_addr)))
    }
}

fn set_timer(slot: &mut Option<Pin<Box<Sleep>>>, deadline: Option<Instant>) {
    let Some(deadline) = deadline else {
        *slot = None;
        return;
    };
    if let Some(sleep) = slot.as_mut() {
        sleep.as_mut().reset(deadline);
        return;
    }
    *slot = Some(Box::pin(tokio::time::sleep_until(deadline)));
}

fn check_timer(slot: &mut Option<Pin<Box<Sleep>>>, cx: &mut Context<'_>) -> io::Result<()> {
    let Some(sleep) = slot.as_mut() else {
        return Ok(());
    };
    // Registers the waker when the deadline is still ahead.
    if sleep.deadline() <= Instant::now() || sleep.as_mut().poll(cx).is_ready() {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "i/o deadline exceeded",
        ));
    }
    Ok(())
}

fn unknown_addr(which: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("{which} address unknown"),
    )
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        check_timer(&mut this.read_deadline, cx)?;
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        check_timer(&mut this.write_deadline, cx)?;
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        check_timer(&mut this.write_deadline, cx)?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> Conn for DeadlineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.local_addr.ok_or_else(|| unknown_addr("local"))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer_addr.ok_or_else(|| unknown_addr("peer"))
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        set_timer(&mut self.read_deadline, deadline);
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        set_timer(&mut self.write_deadline, deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn read_deadline_interrupts_pending_read() {
        let (_peer, local) = duplex(64);
        let mut stream = DeadlineStream::new(local, None, None);
        stream.set_read_deadline(Some(Instant::now() + Duration::from_secs(2)));

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_deadline_restores_io() {
        let (mut peer, local) = duplex(64);
        let mut stream = DeadlineStream::new(local, None, None);
        stream.set_deadline(Some(Instant::now()));

        assert!(stream.write_all(b"late").await.is_err());

        stream.set_deadline(None);
        stream.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn tcp_addresses_are_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        let stream = DeadlineStream::from_tcp(client).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn missing_addresses_are_errors() {
        let (_peer, local) = tokio::io::duplex(8);
        let stream = DeadlineStream::new(local, None, None);
        assert_eq!(
            stream.local_addr().unwrap_err().kind(),
            io::ErrorKind::AddrNotAvailable
        );
    }
}
