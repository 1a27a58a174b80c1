//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Replay the upgrade handshake against the upstream
//! - Relay the upstream's answer to the client
//! - Splice the promoted client stream and the upstream stream together
//!
//! # Data Flow
//! ```text
//! Client ←── DuplexLimiter (throttled bytes) ──→ Proxy ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Byte-level forwarding; frames are never parsed
//! - A non-101 upstream answer is passed through as-is
//! - The tunnel ends when either side closes, on shutdown, or when the
//!   session deadline passes

use std::io;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::http::upgrade::{LimitedUpgrade, Promoted};
use crate::net::TunnelGuard;
use crate::throttle::WaitError;

/// Proxy one WebSocket handshake and, on success, start the tunnel.
pub async fn proxy_websocket(state: &AppState, mut request: Request<Body>) -> Response {
    let request_id = request_id(request.headers()).to_string();

    let upgrade = match request.extensions_mut().remove::<LimitedUpgrade>() {
        Some(upgrade) if upgrade.is_upgradable() => upgrade,
        _ => {
            tracing::warn!(request_id = %request_id, "WebSocket request cannot be promoted");
            return (StatusCode::BAD_REQUEST, "Connection cannot be upgraded").into_response();
        }
    };

    let stream = match tokio::time::timeout(
        state.connect_timeout,
        TcpStream::connect(state.upstream.as_str()),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, upstream = %state.upstream, error = %e, "Upstream connect failed");
            return (StatusCode::BAD_GATEWAY, "Upstream unreachable").into_response();
        }
        Err(_) => {
            tracing::error!(request_id = %request_id, upstream = %state.upstream, "Upstream connect timed out");
            return (StatusCode::GATEWAY_TIMEOUT, "Upstream connect timed out").into_response();
        }
    };

    let (mut sender, conn) = match hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream)).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream handshake failed");
            return (StatusCode::BAD_GATEWAY, "Upstream handshake failed").into_response();
        }
    };
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "Upstream connection ended");
        }
    });

    let upstream_request = match replay_request(&request) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Invalid WebSocket request");
            return (StatusCode::BAD_REQUEST, "Invalid WebSocket request").into_response();
        }
    };

    let mut response = match sender.send_request(upstream_request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream handshake request failed");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::info!(request_id = %request_id, status = %response.status(), "Upstream refused WebSocket upgrade");
        let (parts, body) = response.into_parts();
        return Response::from_parts(parts, Body::new(body));
    }

    let upstream_upgrade = hyper::upgrade::on(&mut response);
    let guard = state.tunnels.track();
    tracing::info!(request_id = %request_id, connection_id = %guard.id(), "WebSocket tunnel accepted");
    tokio::spawn(run_tunnel(upgrade, upstream_upgrade, guard));

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Body::empty())
}

/// The client's handshake, addressed to the upstream in origin form.
fn replay_request(request: &Request<Body>) -> Result<Request<Body>, axum::http::Error> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = Request::builder()
        .method(request.method().clone())
        .uri(path);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in request.headers() {
            headers.append(name, value.clone());
        }
    }
    builder.body(Body::empty())
}

async fn run_tunnel(upgrade: LimitedUpgrade, upstream: OnUpgrade, guard: TunnelGuard) {
    let id = guard.id();
    let ctx = upgrade.context().clone();

    let Promoted { stream: mut client, read_buf } = match upgrade.promote().await {
        Ok(promoted) => promoted,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Client promotion failed");
            ctx.cancel();
            return;
        }
    };

    let mut upstream = match upstream.await {
        Ok(upgraded) => TokioIo::new(upgraded),
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Upstream upgrade failed");
            ctx.cancel();
            return;
        }
    };

    tokio::select! {
        result = splice(&mut client, &mut upstream, &read_buf) => match result {
            Ok((up, down)) => {
                tracing::info!(connection_id = %id, bytes_up = up, bytes_down = down, "WebSocket tunnel closed");
            }
            Err(e) => match WaitError::from_io(&e) {
                Some(wait) => tracing::info!(connection_id = %id, error = %wait, "WebSocket tunnel aborted while throttled"),
                None => tracing::debug!(connection_id = %id, error = %e, "WebSocket tunnel closed with error"),
            },
        },
        _ = ctx.done() => {
            tracing::info!(connection_id = %id, "WebSocket tunnel cancelled");
        }
    }

    ctx.cancel();
}

/// Forward bytes both ways until either side closes.
async fn splice<C, U>(client: &mut C, upstream: &mut U, pending: &[u8]) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    if !pending.is_empty() {
        upstream.write_all(pending).await?;
    }
    tokio::io::copy_bidirectional(client, upstream).await
}
