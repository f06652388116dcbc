//! Per-request proxy pipeline
//!
//! One exchange flows through four steps: capture the inbound request,
//! build the backend target, forward with redirect-following disabled, then
//! route the response through the header and content rewriters based on its
//! status and content type. Nothing is shared across requests beyond the
//! (internally pooled) HTTP client, so exchanges run concurrently without
//! coordination.

use crate::config::RewriteRules;
use crate::content::{ContentRewriter, RewriteStream};
use crate::context::{Origin, RewriteContext};
use crate::error::ProxyError;
use crate::headers;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyDataStream, BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{self, HeaderMap, HeaderValue, HOST};
use hyper::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Response body handed back to the dispatcher.
pub type ProxyBody = UnsyncBoxBody<Bytes, ProxyError>;

/// Deployment configuration for the engine.
pub struct ProxyConfig {
    /// The real site to front.
    pub backend_origin: Origin,
    /// Fixed public origin; when absent it is derived per request from the
    /// inbound Host header and forwarded-proto hints.
    pub public_origin: Option<Origin>,
    /// Bound on the wait for a backend response.
    pub backend_timeout: Duration,
    pub rules: RewriteRules,
}

/// The per-request pipeline.
pub struct ProxyEngine {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyEngine {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        config.rules.validate()?;

        // redirects must surface here as raw 3xx responses so the Location
        // header can be rewritten; the transport never follows them
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.backend_timeout)
            .build()
            .map_err(ProxyError::Client)?;

        Ok(Self { client, config })
    }

    /// Translate one inbound request into one outward response.
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let ctx = self.context_for(req.headers())?;
        let (parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = ctx
            .backend
            .append(path_and_query)
            .map_err(|_| ProxyError::InvalidTarget(path_and_query.to_string()))?;

        debug!("{} {} -> {}", parts.method, path_and_query, target);

        let mut backend_req = self
            .client
            .request(parts.method.clone(), target)
            .headers(forward_headers(&parts.headers, remote_addr));
        if parts.method != Method::GET && parts.method != Method::HEAD {
            backend_req = backend_req.body(reqwest::Body::wrap_stream(BodyDataStream::new(body)));
        }

        let backend_resp = backend_req
            .send()
            .await
            .map_err(ProxyError::BackendUnreachable)?;

        let status = backend_resp.status();
        let mut response_headers = backend_resp.headers().clone();
        headers::strip_hop_by_hop(&mut response_headers);

        if self.config.rules.is_redirect(status) {
            headers::rewrite_location(&mut response_headers, &ctx);
            // the envelope carries no body, whatever the backend sent
            response_headers.remove(header::CONTENT_LENGTH);
            debug!("redirect {} rewritten for {}", status, ctx.public);
            return build_response(status, response_headers, empty_body());
        }

        headers::rewrite_cookies(&mut response_headers);

        if is_html(&response_headers) {
            // the rewritten body has a different length; let it go out chunked
            response_headers.remove(header::CONTENT_LENGTH);
            let rewriter = ContentRewriter::new(&ctx, &self.config.rules)?;
            let stream = RewriteStream::new(backend_resp.bytes_stream(), rewriter);
            return build_response(status, response_headers, stream_body(stream));
        }

        let stream = backend_resp.bytes_stream().map_err(ProxyError::UpstreamBody);
        build_response(status, response_headers, stream_body(stream))
    }

    fn context_for(&self, inbound: &HeaderMap) -> Result<RewriteContext, ProxyError> {
        let public = match &self.config.public_origin {
            Some(origin) => origin.clone(),
            None => {
                let host = inbound
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .ok_or(ProxyError::BadHost)?;
                let scheme = if is_forwarded_https(inbound) { "https" } else { "http" };
                Origin::from_scheme_host(scheme, host).map_err(|_| ProxyError::BadHost)?
            }
        };
        Ok(RewriteContext::new(self.config.backend_origin.clone(), public))
    }
}

/// Check if the inbound request arrived over HTTPS (via proxy headers).
fn is_forwarded_https(headers: &HeaderMap) -> bool {
    if let Some(proto) = headers.get("x-forwarded-proto") {
        if proto.to_str().ok() == Some("https") {
            return true;
        }
    }
    if let Some(ssl) = headers.get("x-forwarded-ssl") {
        if ssl.to_str().ok() == Some("on") {
            return true;
        }
    }
    false
}

/// Headers for the forwarded request.
///
/// Host is dropped so the transport derives it from the backend target;
/// Accept-Encoding is dropped so the backend answers with identity bodies
/// the content rewriter can read; hop-by-hop headers never cross; the body
/// is re-framed by the transport, so its length header goes too.
fn forward_headers(inbound: &HeaderMap, remote_addr: SocketAddr) -> HeaderMap {
    let mut outbound = inbound.clone();
    outbound.remove(HOST);
    outbound.remove(header::ACCEPT_ENCODING);
    outbound.remove(header::CONTENT_LENGTH);
    headers::strip_hop_by_hop(&mut outbound);

    if let Ok(value) = HeaderValue::from_str(&remote_addr.ip().to_string()) {
        outbound.insert("x-forwarded-for", value);
    }
    if let Some(original_host) = inbound.get(HOST) {
        outbound.insert("x-forwarded-host", original_host.clone());
    }
    let proto = if is_forwarded_https(inbound) { "https" } else { "http" };
    outbound.insert("x-forwarded-proto", HeaderValue::from_static(proto));

    outbound
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false)
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: ProxyBody,
) -> Result<Response<ProxyBody>, ProxyError> {
    let mut response = Response::builder().status(status).body(body)?;
    *response.headers_mut() = headers;
    Ok(response)
}

fn stream_body<S>(stream: S) -> ProxyBody
where
    S: Stream<Item = Result<Bytes, ProxyError>> + Send + 'static,
{
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_is_html() {
        assert!(is_html(&header_map(&[("content-type", "text/html")])));
        assert!(is_html(&header_map(&[(
            "content-type",
            "text/html; charset=utf-8"
        )])));
        assert!(!is_html(&header_map(&[(
            "content-type",
            "application/json"
        )])));
        assert!(!is_html(&header_map(&[])));
    }

    #[test]
    fn test_forward_headers() {
        let inbound = header_map(&[
            ("host", "public.example"),
            ("accept", "text/html"),
            ("accept-encoding", "gzip, br"),
            ("connection", "keep-alive"),
            ("cookie", "sid=abc"),
        ]);
        let remote: SocketAddr = "203.0.113.9:55555".parse().unwrap();
        let outbound = forward_headers(&inbound, remote);

        assert!(outbound.get(HOST).is_none());
        assert!(outbound.get(header::ACCEPT_ENCODING).is_none());
        assert!(outbound.get("connection").is_none());
        assert_eq!(outbound.get("cookie").unwrap(), "sid=abc");
        assert_eq!(outbound.get("x-forwarded-for").unwrap(), "203.0.113.9");
        assert_eq!(outbound.get("x-forwarded-host").unwrap(), "public.example");
        assert_eq!(outbound.get("x-forwarded-proto").unwrap(), "http");
    }

    #[test]
    fn test_is_forwarded_https() {
        assert!(is_forwarded_https(&header_map(&[(
            "x-forwarded-proto",
            "https"
        )])));
        assert!(is_forwarded_https(&header_map(&[("x-forwarded-ssl", "on")])));
        assert!(!is_forwarded_https(&header_map(&[(
            "x-forwarded-proto",
            "http"
        )])));
        assert!(!is_forwarded_https(&header_map(&[])));
    }
}
