//! Upstream request forwarding
//!
//! Forwards requests for routable hosts to the single upstream dial target.
//! The incoming `Host` header is kept so the upstream can route by host;
//! hop-by-hop headers are dropped in both directions.

use crate::error::ForwardError;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use tracing::debug;

/// Body type used on both sides of the proxy
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Per RFC 7230 Section 6.1
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is hop-by-hop and should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// HTTP/1 client bound to one upstream address
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, ProxyBody>,
    upstream: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(upstream: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            upstream: upstream.into(),
            timeout,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Forward a request and return the upstream response
    pub async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardError> {
        let start = Instant::now();
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = format!("http://{}{}", self.upstream, path_and_query).parse()?;

        strip_hop_by_hop(&mut parts.headers);
        let mut builder = Request::builder().method(parts.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = parts.headers;
        }
        let upstream_req = builder.body(body)?;

        let response = tokio::time::timeout(self.timeout, self.client.request(upstream_req))
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        debug!(
            upstream = %self.upstream,
            status = parts.status.as_u16(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Upstream response"
        );

        Ok(Response::from_parts(parts, body.boxed_unsync()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("UPGRADE"));
        assert!(!is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("content-type"));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "close".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("host", "a.test".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("host").unwrap(), "a.test");
    }
}
