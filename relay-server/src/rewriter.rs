//! # Content Rewriter
//!
//! Rewrites HTML/JS/CSS response bodies so that content written against a
//! root mount (`/`) keeps working when served under `/t/<slug>/` (spec
//! §4.C). No repo in the example pack implements this; the approach —
//! independent, statically-compiled regex passes over a UTF-8 buffer — is
//! the one spec §9's Design Notes themselves prescribe, using the
//! ecosystem-standard `once_cell::sync::Lazy<Regex>` pattern for hot-path
//! regexes (see DESIGN.md).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Marker left in injected shim output so a second rewrite pass can detect
/// the shim is already present and skip re-injecting it (spec testable
/// property 5: rewriting is idempotent).
const SHIM_MARKER: &str = "__tunnelShimInstalled";

/// Returns `true` if `content_type` indicates a body this rewriter can
/// touch, and which kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Script,
    Css,
}

pub fn classify(content_type: &str) -> Option<BodyKind> {
    let lower = content_type.to_ascii_lowercase();
    if lower.contains("text/html") {
        Some(BodyKind::Html)
    } else if lower.contains("javascript") || lower.contains("typescript") {
        Some(BodyKind::Script)
    } else if lower.contains("text/css") {
        Some(BodyKind::Css)
    } else {
        None
    }
}

/// A URL is rewritten only if it starts with exactly one `/` (not `//`,
/// a protocol-relative URL) and is not already prefixed with the
/// tunnel's mount point.
fn should_rewrite(url: &str, prefix: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.starts_with(prefix)
}

fn rewrite_url(url: &str, prefix: &str) -> String {
    if should_rewrite(url, prefix) {
        format!("{prefix}{}", &url[1..])
    } else {
        url.to_string()
    }
}

// ── HTML attribute rewrite ───────────────────────────────────────────

// No backreference support in the `regex` crate: the closing delimiter is
// matched as "a quote", not "the same quote that opened it". The output
// is reconstructed using the opening quote on both sides.
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?P<attr>data-src|srcset|src|href|action|content)\s*=\s*(?P<quote>["'])(?P<val>[^"']*)["']"#,
    )
    .unwrap()
});

fn rewrite_html_attributes(html: &str, prefix: &str) -> String {
    ATTR_RE
        .replace_all(html, |caps: &Captures| {
            let attr = &caps["attr"];
            let quote = &caps["quote"];
            let val = &caps["val"];
            let rewritten = if attr.eq_ignore_ascii_case("srcset") {
                rewrite_srcset(val, prefix)
            } else {
                rewrite_url(val, prefix)
            };
            format!("{attr}={quote}{rewritten}{quote}")
        })
        .into_owned()
}

/// `srcset` carries comma-separated `<url> <descriptor>` candidates; each
/// URL is rewritten independently.
fn rewrite_srcset(value: &str, prefix: &str) -> String {
    value
        .split(',')
        .map(|candidate| {
            let trimmed = candidate.trim();
            match trimmed.split_once(char::is_whitespace) {
                Some((url, descriptor)) => {
                    format!("{} {}", rewrite_url(url, prefix), descriptor.trim())
                }
                None => rewrite_url(trimmed, prefix),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Inline `<script type="module">` rewrite ──────────────────────────

static MODULE_SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)(<script\s+[^>]*type\s*=\s*["']module["'][^>]*>)([\s\S]*?)(</script>)"#)
        .unwrap()
});

fn rewrite_html_modules(html: &str, prefix: &str) -> String {
    MODULE_SCRIPT_RE
        .replace_all(html, |caps: &Captures| {
            let open = &caps[1];
            let body = &caps[2];
            let close = &caps[3];
            format!("{open}{}{close}", rewrite_js_imports(body, prefix))
        })
        .into_owned()
}

// ── Shared JS import / fetch / URL rewrites ──────────────────────────

// The `regex` crate has no backreference support, so the closing quote is
// matched as "any quote character" rather than "the same one that opened
// it" — fine in practice since well-formed source never mixes them.
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfrom\s+(["'])([^"']+)["']"#).unwrap());
static SIDE_EFFECT_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s+(["'])([^"']+)["']"#).unwrap());
static DYNAMIC_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\(\s*(["'])([^"']+)["']"#).unwrap());
static FETCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfetch\(\s*(["'])([^"']+)["']"#).unwrap());
static NEW_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bnew\s+URL\(\s*(["'])([^"']+)["']"#).unwrap());
static SOURCE_MAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"//#\s*sourceMappingURL=(\S+)"#).unwrap());

/// Applies the import/fetch/URL-constructor rewrites spec §4.C lists for
/// `javascript`/`typescript` content, and for inline `<script
/// type="module">` bodies.
fn rewrite_js_imports(js: &str, prefix: &str) -> String {
    let js = FROM_IMPORT_RE.replace_all(js, |caps: &Captures| {
        rewrite_quoted(&caps[1], &caps[2], "from", prefix)
    });
    let js = SIDE_EFFECT_IMPORT_RE.replace_all(&js, |caps: &Captures| {
        rewrite_quoted(&caps[1], &caps[2], "import", prefix)
    });
    let js = DYNAMIC_IMPORT_RE.replace_all(&js, |caps: &Captures| {
        format!("import({}{}{}", &caps[1], rewrite_url(&caps[2], prefix), &caps[1])
    });
    js.into_owned()
}

fn rewrite_quoted(quote: &str, url: &str, keyword: &str, prefix: &str) -> String {
    format!("{keyword} {quote}{}{quote}", rewrite_url(url, prefix))
}

fn rewrite_js(js: &str, prefix: &str) -> String {
    let js = rewrite_js_imports(js, prefix);
    let js = FETCH_RE.replace_all(&js, |caps: &Captures| {
        format!("fetch({}{}{}", &caps[1], rewrite_url(&caps[2], prefix), &caps[1])
    });
    let js = NEW_URL_RE.replace_all(&js, |caps: &Captures| {
        format!("new URL({}{}{}", &caps[1], rewrite_url(&caps[2], prefix), &caps[1])
    });
    let js = SOURCE_MAP_RE.replace_all(&js, |caps: &Captures| {
        format!("//# sourceMappingURL={}", rewrite_url(&caps[1], prefix))
    });
    js.into_owned()
}

// ── CSS rewrite ───────────────────────────────────────────────────────

static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(\s*(["']?)([^"')]+)["']?\s*\)"#).unwrap());
static CSS_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"@import\s+(["'])([^"']+)["']"#).unwrap());

fn rewrite_css(css: &str, prefix: &str) -> String {
    let css = CSS_URL_RE.replace_all(css, |caps: &Captures| {
        format!("url({}{}{})", &caps[1], rewrite_url(&caps[2], prefix), &caps[1])
    });
    let css = CSS_IMPORT_RE.replace_all(&css, |caps: &Captures| {
        format!("@import {}{}{}", &caps[1], rewrite_url(&caps[2], prefix), &caps[1])
    });
    css.into_owned()
}

// ── Runtime shim ─────────────────────────────────────────────────────

fn render_shim(prefix: &str) -> String {
    format!(
        r#"<script>(function(){{
  if (window.{marker}) return;
  window.{marker} = true;
  var PREFIX = "{prefix}";
  function rewrite(u) {{
    if (typeof u !== "string") return u;
    if (u.indexOf("//") === 0) return u;
    if (u.indexOf("/") !== 0) return u;
    if (u.indexOf(PREFIX) === 0) return u;
    return PREFIX + u.slice(1);
  }}
  var origFetch = window.fetch;
  window.fetch = function(input, init) {{
    if (typeof input === "string") {{
      input = rewrite(input);
    }} else if (input && typeof input.url === "string") {{
      input = new Request(rewrite(input.url), input);
    }}
    return origFetch.call(this, input, init);
  }};
  var origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url) {{
    arguments[1] = rewrite(url);
    return origOpen.apply(this, arguments);
  }};
  var origPush = history.pushState;
  history.pushState = function(state, title, url) {{
    return origPush.call(this, state, title, url ? rewrite(url) : url);
  }};
  var origReplace = history.replaceState;
  history.replaceState = function(state, title, url) {{
    return origReplace.call(this, state, title, url ? rewrite(url) : url);
  }};
  function patchProp(proto, prop) {{
    var desc = Object.getOwnPropertyDescriptor(proto, prop);
    if (!desc || !desc.set) return;
    Object.defineProperty(proto, prop, {{
      get: desc.get,
      set: function(value) {{ desc.set.call(this, rewrite(value)); }},
      configurable: true,
    }});
  }}
  patchProp(HTMLImageElement.prototype, "src");
  patchProp(HTMLScriptElement.prototype, "src");
  patchProp(HTMLLinkElement.prototype, "href");
  var OrigWebSocket = window.WebSocket;
  window.WebSocket = function(url, protocols) {{
    try {{
      if (typeof url === "string" && url.indexOf("/") === 0 && url.indexOf("//") !== 0) {{
        var wsScheme = window.location.protocol === "https:" ? "wss:" : "ws:";
        url = wsScheme + "//" + window.location.host + rewrite(url);
      }}
      return protocols === undefined
        ? new OrigWebSocket(url)
        : new OrigWebSocket(url, protocols);
    }} catch (e) {{
      return {{
        readyState: 3,
        close: function() {{}},
        send: function() {{}},
        addEventListener: function() {{}},
        removeEventListener: function() {{}},
      }};
    }}
  }};
  window.WebSocket.prototype = OrigWebSocket.prototype;
  var OrigEventSource = window.EventSource;
  if (OrigEventSource) {{
    window.EventSource = function(url, config) {{
      return new OrigEventSource(rewrite(url), config);
    }};
    window.EventSource.prototype = OrigEventSource.prototype;
  }}
}})();</script>"#,
        marker = SHIM_MARKER,
        prefix = prefix,
    )
}

fn find_tag_end(html: &str, open_tag_start: usize) -> Option<usize> {
    html[open_tag_start..].find('>').map(|i| open_tag_start + i + 1)
}

fn find_tag_ci(html: &str, tag: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    lower.find(tag)
}

/// Inserts the runtime shim as the first child of `<head>` (synthesising
/// one right after `<html ...>` if absent, or at the very start of the
/// document as a last resort). Skips injection if a shim is already
/// present, so re-running the rewriter is idempotent.
fn inject_shim(html: &str, prefix: &str) -> String {
    if html.contains(SHIM_MARKER) {
        return html.to_string();
    }
    let shim = render_shim(prefix);

    if let Some(head_start) = find_tag_ci(html, "<head") {
        if let Some(insert_at) = find_tag_end(html, head_start) {
            let mut out = String::with_capacity(html.len() + shim.len());
            out.push_str(&html[..insert_at]);
            out.push_str(&shim);
            out.push_str(&html[insert_at..]);
            return out;
        }
    }

    if let Some(html_start) = find_tag_ci(html, "<html") {
        if let Some(insert_at) = find_tag_end(html, html_start) {
            let mut out = String::with_capacity(html.len() + shim.len() + 13);
            out.push_str(&html[..insert_at]);
            out.push_str("<head>");
            out.push_str(&shim);
            out.push_str("</head>");
            out.push_str(&html[insert_at..]);
            return out;
        }
    }

    format!("<head>{shim}</head>{html}")
}

// ── Entry point ───────────────────────────────────────────────────────

/// Rewrites `body` according to `kind`, for the given tunnel `prefix`
/// (e.g. `/t/my-app/`). Returns `None` if `body` is not valid UTF-8, per
/// spec §4.C: non-UTF-8 bodies are passed through unmodified.
pub fn rewrite(kind: BodyKind, body: &[u8], prefix: &str) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(body).ok()?;
    let rewritten = match kind {
        BodyKind::Html => {
            let html = rewrite_html_attributes(text, prefix);
            let html = rewrite_html_modules(&html, prefix);
            let html = rewrite_css(&html, prefix); // inline style="" url(...)
            inject_shim(&html, prefix)
        }
        BodyKind::Script => rewrite_js(text, prefix),
        BodyKind::Css => rewrite_css(text, prefix),
    };
    Some(rewritten.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/t/my-app/";

    #[test]
    fn rewrites_html_attributes_and_injects_shim() {
        let html = r#"<!doctype html><html><head><title>x</title></head><body><img src="/a.png"><script type="module">import x from "/m.js"</script></body></html>"#;
        let out = rewrite(BodyKind::Html, html.as_bytes(), PREFIX).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"<img src="/t/my-app/a.png">"#));
        assert!(out.contains(r#"import x from "/t/my-app/m.js""#));
        assert!(out.contains(SHIM_MARKER));
        // shim is the first thing inside <head>
        let head_pos = out.to_ascii_lowercase().find("<head>").unwrap() + "<head>".len();
        let shim_pos = out.find(SHIM_MARKER).unwrap();
        let title_pos = out.find("<title>").unwrap();
        assert!(shim_pos > head_pos);
        assert!(shim_pos < title_pos);
    }

    #[test]
    fn protocol_relative_url_is_untouched() {
        let html = r#"<img src="//cdn.example/x.js">"#;
        let out = rewrite(BodyKind::Html, html.as_bytes(), PREFIX).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"src="//cdn.example/x.js""#));
    }

    #[test]
    fn already_prefixed_url_is_untouched() {
        let html = r#"<img src="/t/my-app/a.png">"#;
        let out = rewrite(BodyKind::Html, html.as_bytes(), PREFIX).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"src="/t/my-app/a.png""#));
        assert!(!out.contains("/t/my-app/t/my-app"));
    }

    #[test]
    fn rewriting_twice_is_idempotent() {
        let html = r#"<!doctype html><html><head></head><body><img src="/a.png"></body></html>"#;
        let once = rewrite(BodyKind::Html, html.as_bytes(), PREFIX).unwrap();
        let twice = rewrite(BodyKind::Html, &once, PREFIX).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn js_rewrites_fetch_and_dynamic_import() {
        let js = r#"fetch("/api/x"); import("/lazy.js"); import y from "/y.js"; //# sourceMappingURL=/app.js.map"#;
        let out = rewrite(BodyKind::Script, js.as_bytes(), PREFIX).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"fetch("/t/my-app/api/x")"#));
        assert!(out.contains(r#"import("/t/my-app/lazy.js")"#));
        assert!(out.contains(r#"from "/t/my-app/y.js""#));
        assert!(out.contains("sourceMappingURL=/t/my-app/app.js.map"));
    }

    #[test]
    fn css_rewrites_url_and_import() {
        let css = r#"body { background: url(/bg.png); } @import "/base.css";"#;
        let out = rewrite(BodyKind::Css, css.as_bytes(), PREFIX).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("url(/t/my-app/bg.png)"));
        assert!(out.contains(r#"@import "/t/my-app/base.css""#));
    }

    #[test]
    fn non_utf8_body_passes_through_as_none() {
        let body = vec![0xff, 0xfe, 0xfd];
        assert!(rewrite(BodyKind::Html, &body, PREFIX).is_none());
    }

    #[test]
    fn classify_matches_content_type_substrings() {
        assert_eq!(classify("text/html; charset=utf-8"), Some(BodyKind::Html));
        assert_eq!(
            classify("application/javascript"),
            Some(BodyKind::Script)
        );
        assert_eq!(classify("text/css"), Some(BodyKind::Css));
        assert_eq!(classify("application/json"), None);
    }
}
