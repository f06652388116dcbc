//! Response header rewriting: redirect targets and Set-Cookie values

use crate::context::RewriteContext;
use crate::translate;
use hyper::header::{self, HeaderMap, HeaderValue};

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Rewrite the `Location` header of a redirect for the public side.
///
/// Redirect targets are always emitted fully absolute (scheme + public host
/// + path): a bare root-relative target would be ambiguous across schemes.
/// A missing or empty target becomes the public origin itself.
pub fn rewrite_location(headers: &mut HeaderMap, ctx: &RewriteContext) {
    let Some(location) = headers.get(header::LOCATION) else {
        if let Ok(value) = HeaderValue::from_str(ctx.public.as_str()) {
            headers.insert(header::LOCATION, value);
        }
        return;
    };
    // a target that is not valid UTF-8 is left untouched
    let Ok(location) = location.to_str() else {
        return;
    };
    let rewritten = translate::absolutize(location, ctx);
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        headers.insert(header::LOCATION, value);
    }
}

/// Re-scope every `Set-Cookie` entry to the issuing host.
///
/// Backend responses may fold several cookies into one header value,
/// comma-separated. Splitting is heuristic because attribute values can
/// contain commas themselves (`Expires` always does): a comma only counts
/// as a boundary when it is followed by a `name=value` shape with no `;`
/// in between. A value containing `,x=y` therefore mis-splits; that is the
/// documented cost of the heuristic, not something this code second-guesses.
///
/// Each record is re-emitted as its own `Set-Cookie` entry, original order
/// preserved, with every `Domain` attribute dropped regardless of value so
/// the browser scopes the cookie to the host it was issued from. A value
/// that does not parse passes through unrewritten: cookie rewriting is
/// best-effort, never fatal.
pub fn rewrite_cookies(headers: &mut HeaderMap) {
    let values: Vec<HeaderValue> = headers.get_all(header::SET_COOKIE).iter().cloned().collect();
    if values.is_empty() {
        return;
    }

    headers.remove(header::SET_COOKIE);
    for value in values {
        let Ok(raw) = value.to_str() else {
            // opaque bytes pass through untouched
            headers.append(header::SET_COOKIE, value);
            continue;
        };

        let records: Option<Vec<CookieRecord>> =
            split_folded(raw).into_iter().map(CookieRecord::parse).collect();

        match records {
            Some(records) => {
                for record in records {
                    if let Ok(rewritten) = HeaderValue::from_str(&record.without_domain()) {
                        headers.append(header::SET_COOKIE, rewritten);
                    }
                }
            }
            None => {
                headers.append(header::SET_COOKIE, value);
            }
        }
    }
}

/// One logical `Set-Cookie` entry: the `name=value` pair plus its attribute
/// segments, kept verbatim and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pair: String,
    attributes: Vec<String>,
}

impl CookieRecord {
    pub fn parse(entry: &str) -> Option<Self> {
        let mut segments = entry.split(';');
        let pair = segments.next()?.trim();
        let (name, _) = pair.split_once('=')?;
        if name.trim().is_empty() {
            return None;
        }
        let attributes = segments
            .map(|segment| segment.trim().to_string())
            .filter(|segment| !segment.is_empty())
            .collect();
        Some(Self {
            pair: pair.to_string(),
            attributes,
        })
    }

    /// Serialized form with every `Domain` attribute dropped.
    pub fn without_domain(&self) -> String {
        let mut out = self.pair.clone();
        for attr in &self.attributes {
            let key = attr.split_once('=').map(|(key, _)| key).unwrap_or(attr);
            if key.trim().eq_ignore_ascii_case("domain") {
                continue;
            }
            out.push_str("; ");
            out.push_str(attr);
        }
        out
    }
}

/// Split a folded `Set-Cookie` value at cookie boundaries.
fn split_folded(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    for (i, byte) in value.bytes().enumerate() {
        if byte == b',' && is_cookie_boundary(&value[i + 1..]) {
            entries.push(value[start..i].trim());
            start = i + 1;
        }
    }
    entries.push(value[start..].trim());
    entries
}

/// Whether the text after a comma opens a new cookie: at least one character,
/// then `=`, then at least one more, with no `;` anywhere before that `=`.
fn is_cookie_boundary(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    let limit = bytes
        .iter()
        .position(|&b| b == b';')
        .unwrap_or(bytes.len());
    limit >= 3 && bytes[1..limit - 1].contains(&b'=')
}
