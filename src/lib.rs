//! Refront - a URL-rewriting reverse proxy
//!
//! Republishes a backend site under a different public origin, rewriting
//! every outward-facing reference so clients never see the backend's real
//! address:
//! - redirect `Location` targets are retargeted at the public origin
//! - `Set-Cookie` entries are unfolded and their `Domain` attribute dropped
//! - HTML attributes and inline script/style text are rewritten in a
//!   streaming pass, never buffering the document
//! - everything else passes through byte-identical

pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod headers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::RewriteRules;
pub use context::{Origin, OriginError, RewriteContext};
pub use error::ProxyError;
pub use proxy::{ProxyConfig, ProxyEngine};
