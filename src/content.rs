//! Streaming HTML content rewriting
//!
//! Rewrites element attributes and inline script/style text as the document
//! flows through, without ever holding the whole body in memory.

use crate::config::RewriteRules;
use crate::context::RewriteContext;
use crate::error::ProxyError;
use crate::translate;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use lol_html::html_content::{ContentType, TextChunk};
use lol_html::send::{Element, ElementContentHandlers, HtmlRewriter, Settings};
use lol_html::{HandlerResult, Selector};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

type Sink = Box<dyn FnMut(&[u8]) + Send>;
type Handlers = Vec<(Cow<'static, Selector>, ElementContentHandlers<'static>)>;

/// Incremental HTML rewriter for one response body.
///
/// Feed the body through [`write`](Self::write) chunk by chunk and emit
/// whatever comes back immediately; [`finish`](Self::finish) flushes the
/// parser's tail. Attribute rewrites go through the URL translator; inline
/// script/style text gets a literal substring substitution of the backend
/// origin. The substitution is deliberately not URL-aware: a backend origin
/// embedded in unrelated script text is replaced too. Callers rely on that
/// exact behavior, so it must not be swapped for a parser-aware rewrite.
pub struct ContentRewriter {
    rewriter: Option<HtmlRewriter<'static, Sink>>,
    output: Arc<Mutex<BytesMut>>,
}

impl ContentRewriter {
    pub fn new(ctx: &RewriteContext, rules: &RewriteRules) -> Result<Self, ProxyError> {
        let output = Arc::new(Mutex::new(BytesMut::new()));
        let sink: Sink = {
            let output = Arc::clone(&output);
            Box::new(move |chunk: &[u8]| output.lock().extend_from_slice(chunk))
        };

        let mut handlers: Handlers = Vec::new();

        for (tag, attr) in &rules.rewrite_table {
            let attr = attr.clone();
            let ctx = ctx.clone();
            handlers.push((
                Cow::Owned(tag.parse::<Selector>()?),
                ElementContentHandlers::default()
                    .element(move |el: &mut Element| rewrite_element(el, &attr, &ctx)),
            ));
        }

        for tag in ["script", "style"] {
            let backend = ctx.backend.as_str().to_string();
            let public = ctx.public.as_str().to_string();
            let mut run = String::new();
            handlers.push((
                Cow::Owned(tag.parse::<Selector>()?),
                ElementContentHandlers::default().text(move |chunk: &mut TextChunk| {
                    rewrite_text_run(chunk, &mut run, &backend, &public)
                }),
            ));
        }

        let rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::new_send()
            },
            sink,
        );

        Ok(Self {
            rewriter: Some(rewriter),
            output,
        })
    }

    /// Push one chunk of the document through, returning whatever output the
    /// parser released.
    pub fn write(&mut self, chunk: &[u8]) -> Result<Bytes, ProxyError> {
        if let Some(rewriter) = self.rewriter.as_mut() {
            rewriter.write(chunk)?;
        }
        Ok(self.drain())
    }

    /// Signal end of document and flush the remaining output.
    pub fn finish(&mut self) -> Result<Bytes, ProxyError> {
        if let Some(rewriter) = self.rewriter.take() {
            rewriter.end()?;
        }
        Ok(self.drain())
    }

    fn drain(&self) -> Bytes {
        self.output.lock().split().freeze()
    }
}

/// Rewrite the URL-carrying attribute of one element, if present and
/// non-empty.
fn rewrite_element(el: &mut Element, attr: &str, ctx: &RewriteContext) -> HandlerResult {
    if let Some(value) = el.get_attribute(attr) {
        if !value.is_empty() {
            let rewritten = translate::translate(&value, ctx);
            if rewritten != value {
                el.set_attribute(attr, &rewritten)?;
            }
        }
    }
    Ok(())
}

/// Substitute the backend origin inside one inline text run.
///
/// Chunks of a run are withheld until the run is complete, then re-emitted
/// in one piece so an origin string split across chunk boundaries is still
/// caught. Memory is bounded by the largest single script/style block, not
/// the document.
fn rewrite_text_run(
    chunk: &mut TextChunk,
    run: &mut String,
    backend: &str,
    public: &str,
) -> HandlerResult {
    run.push_str(chunk.as_str());
    if chunk.last_in_text_node() {
        let rewritten = run.replace(backend, public);
        chunk.replace(&rewritten, ContentType::Html);
        run.clear();
    } else {
        chunk.remove();
    }
    Ok(())
}

pin_project_lite::pin_project! {
    /// Adapter mapping a backend byte stream through a [`ContentRewriter`],
    /// emitting rewritten chunks as soon as the parser releases them.
    pub struct RewriteStream<S> {
        #[pin]
        upstream: S,
        rewriter: ContentRewriter,
        done: bool,
    }
}

impl<S> RewriteStream<S> {
    pub fn new(upstream: S, rewriter: ContentRewriter) -> Self {
        Self {
            upstream,
            rewriter,
            done: false,
        }
    }
}

impl<S> Stream for RewriteStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.done {
                return Poll::Ready(None);
            }
            match futures_util::ready!(this.upstream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => match this.rewriter.write(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Poll::Ready(Some(Ok(out))),
                    Err(e) => {
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(ProxyError::UpstreamBody(e))));
                }
                None => {
                    *this.done = true;
                    return match this.rewriter.finish() {
                        Ok(out) if out.is_empty() => Poll::Ready(None),
                        Ok(out) => Poll::Ready(Some(Ok(out))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Origin;

    fn ctx() -> RewriteContext {
        RewriteContext::new(
            Origin::parse("https://backend.example").unwrap(),
            Origin::parse("https://public.example").unwrap(),
        )
    }

    fn rewrite_in_chunks(html: &str, chunk_size: usize) -> (String, bool) {
        let mut rewriter = ContentRewriter::new(&ctx(), &RewriteRules::default()).unwrap();
        let mut out = Vec::new();
        let mut emitted_before_end = false;
        for chunk in html.as_bytes().chunks(chunk_size) {
            let piece = rewriter.write(chunk).unwrap();
            if !piece.is_empty() {
                emitted_before_end = true;
            }
            out.extend_from_slice(&piece);
        }
        out.extend_from_slice(&rewriter.finish().unwrap());
        (String::from_utf8(out).unwrap(), emitted_before_end)
    }

    #[test]
    fn test_attribute_rewrites() {
        let html = concat!(
            r#"<a href="https://backend.example/x">t</a>"#,
            r#"<img src="logo.png">"#,
            r#"<link rel="stylesheet" href="/site.css">"#,
            r#"<script src="https://backend.example/app.js"></script>"#,
            r#"<form action="https://other.example/submit"></form>"#,
        );
        let (out, _) = rewrite_in_chunks(html, 1024);
        assert!(out.contains(r#"<a href="https://public.example/x">t</a>"#));
        assert!(out.contains(r#"<img src="/logo.png">"#));
        assert!(out.contains(r#"<link rel="stylesheet" href="/site.css">"#));
        assert!(out.contains(r#"<script src="https://public.example/app.js">"#));
        // external references stay external
        assert!(out.contains(r#"<form action="https://other.example/submit">"#));
    }

    #[test]
    fn test_plain_text_untouched() {
        let html = r#"<p>docs at https://backend.example/docs</p><a href="/x">t</a>"#;
        let (out, _) = rewrite_in_chunks(html, 1024);
        // only script/style text is substituted; ordinary text passes through
        assert!(out.contains("<p>docs at https://backend.example/docs</p>"));
    }

    #[test]
    fn test_inline_script_and_style_substitution() {
        let html = concat!(
            r#"<script>var base = "https://backend.example/api";</script>"#,
            r#"<style>.logo { background: url(https://backend.example/logo.png); }</style>"#,
        );
        let (out, _) = rewrite_in_chunks(html, 1024);
        assert!(out.contains(r#"var base = "https://public.example/api";"#));
        assert!(out.contains("url(https://public.example/logo.png)"));
    }

    #[test]
    fn test_origin_split_across_chunks_still_substituted() {
        let html = r#"<script>fetch("https://backend.example/data.json");</script>"#;
        // 5-byte chunks guarantee the origin string straddles boundaries
        let (out, _) = rewrite_in_chunks(html, 5);
        assert!(out.contains(r#"fetch("https://public.example/data.json");"#));
    }

    #[test]
    fn test_empty_and_missing_attributes_skipped() {
        let html = r#"<a href="">empty</a><a name="top">bare</a>"#;
        let (out, _) = rewrite_in_chunks(html, 1024);
        assert!(out.contains(r#"<a href="">empty</a>"#));
        assert!(out.contains(r#"<a name="top">bare</a>"#));
    }

    #[test]
    fn test_streams_incrementally() {
        // enough repeated markup that output must appear well before the end
        let mut html = String::new();
        for i in 0..200 {
            html.push_str(&format!(
                r#"<p>block {i}</p><a href="https://backend.example/p/{i}">x</a>"#
            ));
        }
        let (out, emitted_before_end) = rewrite_in_chunks(&html, 256);
        assert!(emitted_before_end);
        assert!(out.contains(r#"<a href="https://public.example/p/199">x</a>"#));
    }

    #[test]
    fn test_rewrite_stream_end_to_end() {
        let html = r#"<html><body><a href="https://backend.example/x">t</a><script>var u = "https://backend.example";</script></body></html>"#;
        let chunks: Vec<Result<Bytes, reqwest::Error>> = html
            .as_bytes()
            .chunks(8)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let rewriter = ContentRewriter::new(&ctx(), &RewriteRules::default()).unwrap();
        let stream = RewriteStream::new(futures_util::stream::iter(chunks), rewriter);

        use futures_util::StreamExt;
        let collected: Vec<_> = tokio_test::block_on(stream.collect::<Vec<_>>());
        let mut out = Vec::new();
        for piece in collected {
            out.extend_from_slice(&piece.unwrap());
        }
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"<a href="https://public.example/x">t</a>"#));
        assert!(out.contains(r#"var u = "https://public.example";"#));
    }
}
