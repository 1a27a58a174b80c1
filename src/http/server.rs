//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, timeout, request ID, WebSocket rate limit)
//! - Bind server to listener
//! - Forward plain HTTP to the upstream
//! - Hand WebSocket handshakes to the tunnel handler
//! - Stop accepting on shutdown

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, Scheme},
        Request, StatusCode, Uri,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::middleware::{ws_rate_limit_middleware, WebSocketRateLimit};
use crate::http::request::{is_websocket_request, request_id};
use crate::http::websocket;
use crate::lifecycle::Shutdown;
use crate::net::TunnelTracker;
use crate::observability::{metrics, MetricsObserver};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    /// Upstream `host:port`.
    pub upstream: String,
    pub connect_timeout: Duration,
    pub tunnels: TunnelTracker,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    config: ProxyConfig,
    shutdown: Shutdown,
    tunnels: TunnelTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig, shutdown: Shutdown) -> Self {
        Self {
            config,
            shutdown,
            tunnels: TunnelTracker::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// `local_addr` is reported by promoted connections whose socket is
    /// not directly reachable.
    #[allow(deprecated)]
    pub fn router(&self, local_addr: Option<SocketAddr>) -> Router {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(self.config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            client,
            upstream: self.config.upstream.address.clone(),
            connect_timeout: Duration::from_secs(self.config.timeouts.connect_secs),
            tunnels: self.tunnels.clone(),
        };

        let limit = Arc::new(
            WebSocketRateLimit::from_config(&self.config.websocket_rate_limit, self.shutdown.clone())
                .with_observer(Arc::new(MetricsObserver))
                .with_local_addr(local_addr),
        );

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(limit, ws_rate_limit_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            "HTTP server starting"
        );

        let app = self
            .router(Some(addr))
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!(open_tunnels = self.tunnels.active_count(), "HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if is_websocket_request(request.headers()) {
        let start_time = Instant::now();
        let method = request.method().to_string();
        let response = websocket::proxy_websocket(&state, request).await;
        metrics::record_request(&method, response.status().as_u16(), start_time);
        return response;
    }

    forward(&state, request).await
}

/// Forward a plain HTTP request to the upstream.
async fn forward(state: &AppState, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        "Proxying request"
    );

    let (mut parts, body) = request.into_parts();
    parts.uri = match upstream_uri(&state.upstream, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, upstream = %state.upstream, error = %e, "Invalid upstream URI");
            metrics::record_request(&method, 502, start_time);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream address").into_response();
        }
    };

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_request(&method, 502, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Rewrite `original` to point at the upstream, keeping path and query.
fn upstream_uri(upstream: &str, original: &Uri) -> Result<Uri, axum::http::Error> {
    let authority = Authority::from_str(upstream)?;
    let mut parts = original.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some("/".parse()?);
    }
    Ok(Uri::from_parts(parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_uri_keeps_path_and_query() {
        let original: Uri = "/api/items?page=2".parse().unwrap();
        let uri = upstream_uri("127.0.0.1:3000", &original).unwrap();
        assert_eq!(uri, "http://127.0.0.1:3000/api/items?page=2");
    }

    #[test]
    fn upstream_uri_rejects_bad_authority() {
        let original: Uri = "/".parse().unwrap();
        assert!(upstream_uri("not a host", &original).is_err());
    }
}
