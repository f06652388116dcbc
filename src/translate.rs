//! URL translation between the backend and public origins

use crate::context::RewriteContext;

/// Rewrite a single URL-like value for the public side of the proxy.
///
/// Classification, in order:
/// 1. empty values pass through,
/// 2. values under the backend origin get that prefix swapped for the
///    public origin, path/query/fragment untouched,
/// 3. any other absolute value (a `scheme:` form or protocol-relative
///    `//host/...`) is a genuine external reference and passes through,
/// 4. everything else is relative: it gains a leading `/` if missing so it
///    resolves against the public origin's root.
///
/// Total and idempotent: unparseable input falls through to rule 4, and a
/// second pass over any output is a no-op.
pub fn translate(value: &str, ctx: &RewriteContext) -> String {
    if value.is_empty() {
        return String::new();
    }

    let backend = ctx.backend.as_str();
    if let Some(prefix) = value.get(..backend.len()) {
        if prefix.eq_ignore_ascii_case(backend) {
            return format!("{}{}", ctx.public.as_str(), &value[backend.len()..]);
        }
    }

    if is_absolute(value) {
        return value.to_string();
    }

    if value.starts_with('/') {
        value.to_string()
    } else {
        format!("/{value}")
    }
}

/// Translate a redirect target and force the result to a fully absolute
/// form. Redirect targets must be unambiguous across schemes, so a bare
/// root-relative path is anchored to the public origin.
pub fn absolutize(value: &str, ctx: &RewriteContext) -> String {
    let translated = translate(value, ctx);
    if is_absolute(&translated) {
        translated
    } else {
        // translated is empty or root-relative at this point
        format!("{}{}", ctx.public.as_str(), translated)
    }
}

/// Whether a value is absolute: `scheme:` per the RFC 3986 scheme grammar,
/// or protocol-relative.
fn is_absolute(value: &str) -> bool {
    if value.starts_with("//") {
        return true;
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for c in chars {
        match c {
            ':' => return true,
            c if c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.' => {}
            _ => return false,
        }
    }
    false
}
