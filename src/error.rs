//! Error taxonomy for the proxy pipeline

use thiserror::Error;

/// Errors produced while translating one request/response exchange.
///
/// Cookie parse failures are deliberately absent: a `Set-Cookie` value the
/// splitter cannot make sense of passes through unrewritten instead of
/// failing the exchange.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The forward call to the backend failed outright: connection refused,
    /// DNS failure, or the bounded wait elapsed. Never retried here.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(#[source] reqwest::Error),

    /// The backend accepted the request but its body stream failed mid-flight.
    #[error("backend body stream failed: {0}")]
    UpstreamBody(#[source] reqwest::Error),

    /// The inbound path and query do not join onto the backend origin.
    #[error("cannot build backend target for `{0}`")]
    InvalidTarget(String),

    /// The public origin must be derived from the request, but the Host
    /// header is missing or unusable.
    #[error("missing or unusable Host header")]
    BadHost,

    /// The forwarding client could not be constructed.
    #[error("http client init failed: {0}")]
    Client(#[source] reqwest::Error),

    /// The streaming HTML rewriter rejected the document.
    #[error("content rewrite failed: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),

    /// The tag/attribute rewrite table contains an unusable tag name.
    #[error("invalid rewrite table entry: {0}")]
    Rules(#[from] lol_html::errors::SelectorError),

    /// Outward response assembly failed.
    #[error("response build failed: {0}")]
    Http(#[from] hyper::http::Error),
}
