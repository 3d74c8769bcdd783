//! HTTP Server - gates requests on the host route table
//!
//! Requests whose host is routable are forwarded to the upstream; all
//! others get 404. The same handler serves plain HTTP and TLS listeners.

use crate::apis::metrics::{gather_controller_metrics, record_host_lookup};
use crate::error::ForwardError;
use crate::proxy::forwarder::{Forwarder, ProxyBody};
use crate::proxy::router::HostRoutes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Host-gating reverse proxy
pub struct ProxyServer {
    routes: HostRoutes,
    forwarder: Forwarder,
}

impl ProxyServer {
    pub fn new(routes: HostRoutes, forwarder: Forwarder) -> Self {
        Self { routes, forwarder }
    }

    /// Route one request: forward if its host is routable, else 404
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + 'static,
    {
        let host = request_host(&req).map(str::to_string);
        let routable = host
            .as_deref()
            .is_some_and(|host| self.routes.is_routable(host));
        record_host_lookup(routable);

        if !routable {
            debug!(host = host.as_deref().unwrap_or("-"), "Host not routable");
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }

        match self.forwarder.forward(req.map(|body| body.boxed_unsync())).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    host = host.as_deref().unwrap_or("-"),
                    upstream = %self.forwarder.upstream(),
                    error = %e,
                    "Upstream request failed"
                );
                match e {
                    ForwardError::Timeout(_) => {
                        text_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
                    }
                    _ => text_response(StatusCode::BAD_GATEWAY, "Bad Gateway"),
                }
            }
        }
    }

    /// Accept plain HTTP connections until cancelled
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        let local = local_addr(&listener);
        info!(addr = %local, "HTTP listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(addr = %local, "HTTP listener stopped");
                    return;
                }
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {} on {}", peer_addr, local);
                        Arc::clone(&self).spawn_connection(stream, cancel.clone());
                    }
                    Err(e) => error!("Accept error on {}: {}", local, e),
                },
            }
        }
    }

    /// Accept TLS connections until cancelled
    pub async fn serve_tls(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
        cancel: CancellationToken,
    ) {
        let local = local_addr(&listener);
        info!(addr = %local, "HTTPS listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(addr = %local, "HTTPS listener stopped");
                    return;
                }
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        let acceptor = acceptor.clone();
                        let server = Arc::clone(&self);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => server.spawn_connection(tls_stream, cancel),
                                Err(e) => debug!("TLS handshake with {} failed: {}", peer_addr, e),
                            }
                        });
                    }
                    Err(e) => error!("Accept error on {}: {}", local, e),
                },
            }
        }
    }

    fn spawn_connection<I>(self: Arc<Self>, stream: I, cancel: CancellationToken)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let server = Arc::clone(&self);
                async move { Ok::<_, Infallible>(server.handle_request(req).await) }
            });

            let connection = http1::Builder::new().serve_connection(io, service);
            futures::pin_mut!(connection);

            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        debug!("Connection error: {}", e);
                    }
                }
                _ = cancel.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.as_mut().await {
                        debug!("Connection error during shutdown: {}", e);
                    }
                }
            }
        });
    }
}

/// Serve Prometheus metrics on `GET /metrics` until cancelled
pub async fn serve_metrics(listener: TcpListener, cancel: CancellationToken) {
    let local = local_addr(&listener);
    info!(addr = %local, "Metrics listener started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    tokio::spawn(async move {
                        let service = service_fn(|req: Request<Incoming>| async move {
                            Ok::<_, Infallible>(metrics_response(req.uri().path()))
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Metrics connection error: {}", e);
                        }
                    });
                }
                Err(e) => error!("Accept error on {}: {}", local, e),
            },
        }
    }
}

fn metrics_response(path: &str) -> Response<ProxyBody> {
    if path != "/metrics" {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }
    match gather_controller_metrics() {
        Ok(body) => {
            let mut response = text_response(StatusCode::OK, body);
            if let Ok(value) = "text/plain; version=0.0.4".parse() {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

fn local_addr(listener: &TcpListener) -> String {
    listener
        .local_addr()
        .map(|addr: SocketAddr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(
        Full::new(body.into())
            .map_err(|never| match never {})
            .boxed_unsync(),
    );
    *response.status_mut() = status;
    response
}

/// Request host without port: `Host` header first, then the URI authority
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    let raw = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))?;
    let host = strip_port(raw.trim());
    (!host.is_empty()).then_some(host)
}

/// Strip a trailing `:port`; bracketed IPv6 literals keep their brackets
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}
