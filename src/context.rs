//! Origin values and the per-request rewrite context

use thiserror::Error;
use url::Url;

/// A normalized base URL: scheme + host[:port], optionally with a path prefix.
///
/// The textual form never carries a trailing slash, so it can be used for
/// exact prefix matching and literal substring substitution against values
/// found in headers and markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    url: Url,
    text: String,
}

/// Errors from origin construction
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("origin `{0}` has no host")]
    MissingHost(String),
}

impl Origin {
    /// Parse an origin from its string form, e.g. `https://backend.example`.
    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let url = Url::parse(raw)?;
        if url.host_str().is_none() {
            return Err(OriginError::MissingHost(raw.to_string()));
        }
        let text = url.as_str().trim_end_matches('/').to_string();
        Ok(Self { url, text })
    }

    /// Build an origin from a scheme and a `host[:port]` authority, e.g. the
    /// authority taken from an inbound Host header.
    pub fn from_scheme_host(scheme: &str, host: &str) -> Result<Self, OriginError> {
        Self::parse(&format!("{scheme}://{host}"))
    }

    /// Textual form without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The parsed URL backing this origin.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Append an inbound path-and-query to this origin, unchanged.
    pub fn append(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{}", self.text, path_and_query))
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// The two origins governing one request/response exchange.
///
/// Built once per request and only ever read afterwards; every rewrite is a
/// pure function of a value plus this context.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// The real site the proxy fronts.
    pub backend: Origin,
    /// The scheme+host the client actually connected to.
    pub public: Origin,
}

impl RewriteContext {
    pub fn new(backend: Origin, public: Origin) -> Self {
        Self { backend, public }
    }
}
