//! WebSocket rate limit middleware.
//!
//! # Responsibilities
//! - Let plain HTTP pass through untouched
//! - Give every WebSocket request a `LimitedUpgrade` in place of hyper's
//!   `OnUpgrade`, so promotion always yields a throttled stream
//!
//! # Design Decisions
//! - Rate limits are provisioned once; buckets are built per connection
//! - Each connection's context is a child of the shutdown token

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use hyper::upgrade::OnUpgrade;

use crate::config::WebSocketRateLimitConfig;
use crate::http::request::{is_websocket_request, request_id};
use crate::http::upgrade::LimitedUpgrade;
use crate::lifecycle::Shutdown;
use crate::throttle::{ConnectionContext, Direction, NoopObserver, RateConfig, ThrottleObserver};

/// Middleware state shared by every request.
pub struct WebSocketRateLimit {
    rate: RateConfig,
    shutdown: Shutdown,
    session_timeout: Option<Duration>,
    observer: Arc<dyn ThrottleObserver>,
    local_addr: Option<SocketAddr>,
}

impl WebSocketRateLimit {
    pub fn new(rate: RateConfig, shutdown: Shutdown) -> Self {
        Self {
            rate,
            shutdown,
            session_timeout: None,
            observer: Arc::new(NoopObserver),
            local_addr: None,
        }
    }

    /// Provision rate limits and the session deadline from the raw options.
    pub fn from_config(config: &WebSocketRateLimitConfig, shutdown: Shutdown) -> Self {
        let session_timeout =
            (config.session_timeout_secs > 0).then(|| Duration::from_secs(config.session_timeout_secs));
        Self::new(RateConfig::provision(config), shutdown).with_session_timeout(session_timeout)
    }

    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ThrottleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Listener address, reported by promoted streams that cannot supply
    /// their own.
    pub fn with_local_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.local_addr = addr;
        self
    }

    pub fn rate(&self) -> &RateConfig {
        &self.rate
    }

    /// Fresh context for one connection: cancelled on shutdown, bounded by
    /// the session timeout if one is set.
    pub fn connection_context(&self) -> ConnectionContext {
        let ctx = self.shutdown.connection_context();
        match self.session_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    fn limited_upgrade(&self, on_upgrade: Option<OnUpgrade>, peer_addr: Option<SocketAddr>) -> LimitedUpgrade {
        LimitedUpgrade::new(on_upgrade, self.rate, self.connection_context())
            .with_observer(self.observer.clone())
            .with_addrs(self.local_addr, peer_addr)
    }
}

/// Swap the upgrade handle of WebSocket requests for a rate limited one.
///
/// The downstream handler's response is returned unchanged.
pub async fn ws_rate_limit_middleware(
    State(limit): State<Arc<WebSocketRateLimit>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_request(request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!(
        request_id = %request_id(request.headers()),
        upload_limited = limit.rate.is_enabled(Direction::Upload),
        download_limited = limit.rate.is_enabled(Direction::Download),
        "Rate limiting WebSocket request"
    );

    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let on_upgrade = request.extensions_mut().remove::<OnUpgrade>();

    let upgrade = limit.limited_upgrade(on_upgrade, peer_addr);
    request.extensions_mut().insert(upgrade);

    next.run(request).await
}
