//! HTTP dispatcher
//!
//! The thin edge of the system: accept connections, hand every request to
//! the engine, map engine errors to plain status responses. All rewriting
//! lives behind [`ProxyEngine::handle`].

use crate::error::ProxyError;
use crate::proxy::{ProxyBody, ProxyEngine};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Bind and serve until the process is stopped.
pub async fn run(engine: Arc<ProxyEngine>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let engine = engine.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let engine = engine.clone();
                async move { handle_request(engine, req, remote_addr).await }
            });

            if let Err(e) = http1::Builder::new()
                .preserve_header_case(true)
                .serve_connection(io, service)
                .await
            {
                debug!("connection error from {}: {}", remote_addr, e);
            }
        });
    }
}

async fn handle_request(
    engine: Arc<ProxyEngine>,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    if req.uri().path() == "/health" {
        return Ok(text_response(StatusCode::OK, "OK"));
    }

    match engine.handle(req, remote_addr).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("request from {} failed: {}", remote_addr, e);
            let status = status_for(&e);
            let reason = status.canonical_reason().unwrap_or("Error");
            Ok(text_response(status, reason))
        }
    }
}

fn status_for(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::BackendUnreachable(_) | ProxyError::UpstreamBody(_) => StatusCode::BAD_GATEWAY,
        ProxyError::BadHost | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        ProxyError::Client(_) | ProxyError::Rewrite(_) | ProxyError::Rules(_) | ProxyError::Http(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(
            Full::new(Bytes::from(body.to_string()))
                .map_err(|never| match never {})
                .boxed_unsync(),
        )
        .unwrap()
}
