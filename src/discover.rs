//! Feed discovery for sites that only advertise a feed indirectly.
//!
//! Three independent strategies are attempted and merged, de-duplicated
//! by resolved absolute URL:
//!
//! 1. `<link>` elements in the page head whose `type` mentions a feed
//! 2. in-body anchors whose `href` looks feed-shaped
//! 3. HEAD probes of the conventional feed paths
//!
//! HTML is scanned with plain string searching — feed hints live in a
//! handful of attributes, and a full HTML parser buys nothing here. Every
//! individual probe failure is swallowed; an empty candidate list is a
//! valid result, never an error.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::fetch::read_limited_bytes;
use crate::util::strip_control_chars;

/// Conventional feed locations probed during discovery. Fixed constants:
/// deployed sites are checked against exactly this list, in this order.
pub const CONVENTIONAL_PROBE_PATHS: [&str; 9] = [
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/feed",
    "/feed/rss",
    "/feed/atom",
    "/rss",
    "/atom",
    "/index.xml",
];

/// Cap on the HTML page read during strategies 1 and 2.
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024; // 5MB

/// Timeout for the initial page fetch (the probes have their own).
const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed flavor guessed for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Atom,
    /// XML-ish but not classifiable from the available hints.
    Xml,
}

/// One discovered feed candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedCandidate {
    pub url: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: FeedKind,
}

/// Errors that abort discovery outright. Almost nothing does: only an
/// input URL that cannot be parsed at all.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid site URL: {0}")]
    InvalidUrl(String),
}

/// Knobs for the probe step.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    /// Wall-clock budget for the whole probe step; a hung probe must not
    /// stall discovery past it.
    pub budget: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            probe_concurrency: 4,
            budget: Duration::from_secs(20),
        }
    }
}

/// Discover feed URLs for a site.
///
/// The page-scan strategies and the path probes are independent: a site
/// whose HTML cannot be fetched still gets its conventional paths probed.
///
/// # Errors
///
/// [`DiscoveryError::InvalidUrl`] when `site_url` does not parse. All
/// network-level failures inside the strategies degrade to fewer (or
/// zero) candidates.
pub async fn discover_feeds(
    client: &reqwest::Client,
    site_url: &str,
    options: &DiscoveryOptions,
) -> Result<Vec<FeedCandidate>, DiscoveryError> {
    let base = Url::parse(site_url).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;

    let mut candidates = Vec::new();

    match fetch_page(client, &base).await {
        Ok(html) => {
            candidates.extend(scan_link_tags(&html, &base));
            candidates.extend(scan_anchor_tags(&html, &base));
        }
        Err(e) => {
            tracing::debug!(
                url = %site_url,
                error = %e,
                "site page fetch failed, probing conventional paths only"
            );
        }
    }

    candidates.extend(probe_conventional_paths(client, &base, options).await);

    let candidates = dedup_candidates(candidates);
    tracing::debug!(url = %site_url, found = candidates.len(), "discovery finished");
    Ok(candidates)
}

/// First occurrence wins, keyed by resolved URL, order preserved.
fn dedup_candidates(candidates: Vec<FeedCandidate>) -> Vec<FeedCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

async fn fetch_page(client: &reqwest::Client, base: &Url) -> anyhow::Result<String> {
    let response = tokio::time::timeout(PAGE_TIMEOUT, client.get(base.as_str()).send())
        .await
        .map_err(|_| anyhow::anyhow!("page fetch timed out"))??
        .error_for_status()?;
    let bytes = read_limited_bytes(response, MAX_PAGE_BYTES).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Strategy 1: <link> elements
// ============================================================================

fn scan_link_tags(html: &str, base: &Url) -> Vec<FeedCandidate> {
    let mut out = Vec::new();
    for tag in tags_named(html, "<link") {
        let Some(type_attr) = extract_attr_value(tag, "type") else {
            continue;
        };
        let type_lower = type_attr.to_ascii_lowercase();
        if !(type_lower.contains("rss") || type_lower.contains("atom") || type_lower.contains("xml"))
        {
            continue;
        }
        let Some(href) = extract_attr_value(tag, "href") else {
            continue;
        };
        let Some(url) = resolve_url(href, base) else {
            continue;
        };
        let title = extract_attr_value(tag, "title")
            .map(clean_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "RSS Feed".to_owned());
        out.push(FeedCandidate {
            url,
            title,
            kind: classify_feed_kind(&type_lower),
        });
    }
    out
}

// ============================================================================
// Strategy 2: anchor elements
// ============================================================================

const ANCHOR_HINTS: [&str; 4] = ["rss", "atom", "feed", "xml"];

fn scan_anchor_tags(html: &str, base: &Url) -> Vec<FeedCandidate> {
    let html_lower = html.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut search_from = 0;

    while let Some(pos) = html_lower[search_from..].find("<a") {
        let abs = search_from + pos;
        // Require a delimiter so <article> and friends don't match
        let delimiter = html_lower.as_bytes().get(abs + 2);
        if !matches!(delimiter, Some(b' ' | b'\t' | b'\n' | b'\r' | b'>')) {
            search_from = abs + 2;
            continue;
        }
        let Some(end) = html_lower[abs..].find('>') else {
            break;
        };
        let tag = &html[abs..abs + end + 1];
        let after_tag = abs + end + 1;
        search_from = after_tag;

        let Some(href) = extract_attr_value(tag, "href") else {
            continue;
        };
        let href_lower = href.to_ascii_lowercase();
        if !ANCHOR_HINTS.iter().any(|hint| href_lower.contains(hint)) {
            continue;
        }
        let Some(url) = resolve_url(href, base) else {
            continue;
        };
        let title = anchor_text(&html[after_tag..]).unwrap_or_else(|| "RSS Feed".to_owned());
        // The link's own type attribute is the better signal; the
        // filename heuristic covers bare hrefs
        let kind = extract_attr_value(tag, "type")
            .map(|t| classify_feed_kind(&t.to_ascii_lowercase()))
            .unwrap_or_else(|| classify_feed_kind(&href_lower));
        out.push(FeedCandidate { url, title, kind });
    }
    out
}

/// Visible text of an anchor: everything up to the next tag.
fn anchor_text(after_tag: &str) -> Option<String> {
    let end = after_tag.find('<')?;
    let text = clean_title(&after_tag[..end]);
    (!text.is_empty()).then_some(text)
}

// ============================================================================
// Strategy 3: conventional path probes
// ============================================================================

async fn probe_conventional_paths(
    client: &reqwest::Client,
    base: &Url,
    options: &DiscoveryOptions,
) -> Vec<FeedCandidate> {
    // Probes run concurrently and finish out of order; indices restore
    // the fixed path ordering afterwards
    let found: Mutex<Vec<(usize, FeedCandidate)>> = Mutex::new(Vec::new());

    let work = futures::stream::iter(CONVENTIONAL_PROBE_PATHS.iter().enumerate())
        .map(|(index, path)| {
            let client = client.clone();
            let base = base.clone();
            let probe_timeout = options.probe_timeout;
            async move {
                probe_path(&client, &base, path, probe_timeout)
                    .await
                    .map(|candidate| (index, candidate))
            }
        })
        .buffer_unordered(options.probe_concurrency.max(1))
        .for_each(|result| {
            if let Some(hit) = result {
                found.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(hit);
            }
            futures::future::ready(())
        });

    if tokio::time::timeout(options.budget, work).await.is_err() {
        tracing::debug!(
            budget_ms = (options.budget.as_millis() as u64),
            "discovery probe budget exhausted, keeping partial results"
        );
    }

    let mut found = found
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    found.sort_by_key(|(index, _)| *index);
    found.into_iter().map(|(_, candidate)| candidate).collect()
}

/// One lightweight existence check. Every failure mode — bad join,
/// timeout, network error, non-success status, non-XML content type — is
/// an individual `None`, never an error.
async fn probe_path(
    client: &reqwest::Client,
    base: &Url,
    path: &str,
    timeout: Duration,
) -> Option<FeedCandidate> {
    let url = base.join(path).ok()?;
    let response = tokio::time::timeout(timeout, client.head(url.as_str()).send())
        .await
        .ok()?
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    // Cross-check the declared content type when there is one; a server
    // that declares nothing is accepted on status alone
    if let Some(content_type) = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !content_type.to_ascii_lowercase().contains("xml") {
            return None;
        }
    }

    tracing::debug!(url = %url, "conventional path probe hit");
    Some(FeedCandidate {
        url: url.to_string(),
        title: "RSS Feed".to_owned(),
        kind: classify_feed_kind(path),
    })
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Classify a feed hint string (MIME type, href, or path): `atom` beats
/// `rss`, anything else is generic xml.
fn classify_feed_kind(hint: &str) -> FeedKind {
    if hint.contains("atom") {
        FeedKind::Atom
    } else if hint.contains("rss") {
        FeedKind::Rss
    } else {
        FeedKind::Xml
    }
}

fn clean_title(raw: &str) -> String {
    strip_control_chars(raw.trim()).trim().to_owned()
}

/// All complete tags beginning with `opener` (e.g. `"<link"`), original
/// casing preserved. ASCII-lowercases for matching so byte offsets stay
/// aligned with the original text.
fn tags_named<'a>(html: &'a str, opener: &str) -> Vec<&'a str> {
    let html_lower = html.to_ascii_lowercase();
    let mut tags = Vec::new();
    let mut search_from = 0;

    while let Some(pos) = html_lower[search_from..].find(opener) {
        let abs = search_from + pos;
        let Some(end) = html_lower[abs..].find('>') else {
            break;
        };
        tags.push(&html[abs..abs + end + 1]);
        search_from = abs + end + 1;
    }
    tags
}

/// Extract the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let attr_start = tag_lower.find(&attr_prefix)?;
    let value_start = attr_start + attr_prefix.len();

    if value_start >= tag.len() {
        return None;
    }

    let rest = &tag[value_start..];
    let quote = *rest.as_bytes().first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}

/// Resolve a potentially relative URL against the site base.
fn resolve_url(href: &str, base: &Url) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_owned());
    }

    // Protocol-relative: normalize through the URL parser rather than
    // string concatenation
    if href.starts_with("//") {
        return Url::parse(&format!("{}:{}", base.scheme(), href))
            .ok()
            .map(|u| u.to_string());
    }

    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        Url::parse("https://example.com").unwrap()
    }

    // --- <link> scanning ---

    #[test]
    fn test_head_link_rss() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/rss.xml" title="Main feed">
        </head><body></body></html>"#;
        let found = scan_link_tags(html, &base());
        assert_eq!(
            found,
            vec![FeedCandidate {
                url: "https://example.com/rss.xml".into(),
                title: "Main feed".into(),
                kind: FeedKind::Rss,
            }]
        );
    }

    #[test]
    fn test_head_link_atom_with_absolute_href() {
        let html = r#"<link type="application/atom+xml" href="https://cdn.example.com/atom.xml">"#;
        let found = scan_link_tags(html, &base());
        assert_eq!(found[0].url, "https://cdn.example.com/atom.xml");
        assert_eq!(found[0].kind, FeedKind::Atom);
        assert_eq!(found[0].title, "RSS Feed");
    }

    #[test]
    fn test_head_link_generic_xml_type() {
        let html = r#"<link type="text/xml" href="/index.xml">"#;
        let found = scan_link_tags(html, &base());
        assert_eq!(found[0].kind, FeedKind::Xml);
    }

    #[test]
    fn test_head_link_reversed_attrs_and_single_quotes() {
        let html = r#"<link href='/feed.xml' type='application/rss+xml' rel='alternate'>"#;
        let found = scan_link_tags(html, &base());
        assert_eq!(found[0].url, "https://example.com/feed.xml");
    }

    #[test]
    fn test_stylesheet_link_ignored() {
        let html = r#"<link rel="stylesheet" type="text/css" href="/style.css">"#;
        assert!(scan_link_tags(html, &base()).is_empty());
    }

    #[test]
    fn test_protocol_relative_href_normalized() {
        let html = r#"<link type="application/rss+xml" href="//feeds.example.com/rss">"#;
        let found = scan_link_tags(html, &base());
        assert_eq!(found[0].url, "https://feeds.example.com/rss");
    }

    // --- anchor scanning ---

    #[test]
    fn test_anchor_with_feed_href_and_text_title() {
        let html = r#"<body><a href="/blog/feed">Subscribe here</a></body>"#;
        let found = scan_anchor_tags(html, &base());
        assert_eq!(
            found,
            vec![FeedCandidate {
                url: "https://example.com/blog/feed".into(),
                title: "Subscribe here".into(),
                kind: FeedKind::Xml,
            }]
        );
    }

    #[test]
    fn test_anchor_filename_heuristic() {
        let html = r#"<a href="/atom.xml">a</a> <a href="/rss.xml">b</a> <a href="/data.xml">c</a>"#;
        let kinds: Vec<FeedKind> = scan_anchor_tags(html, &base())
            .into_iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(kinds, vec![FeedKind::Atom, FeedKind::Rss, FeedKind::Xml]);
    }

    #[test]
    fn test_anchor_type_attribute_beats_filename() {
        let html = r#"<a href="/feed" type="application/atom+xml">feed</a>"#;
        let found = scan_anchor_tags(html, &base());
        assert_eq!(found[0].kind, FeedKind::Atom);
    }

    #[test]
    fn test_unrelated_anchor_ignored() {
        let html = r#"<a href="/about">About us</a>"#;
        assert!(scan_anchor_tags(html, &base()).is_empty());
    }

    #[test]
    fn test_article_tag_not_mistaken_for_anchor() {
        let html = r#"<article href="/rss.xml">not a link</article>"#;
        assert!(scan_anchor_tags(html, &base()).is_empty());
    }

    #[test]
    fn test_anchor_without_text_gets_default_title() {
        let html = r#"<a href="/rss.xml"><img src="/rss.png"></a>"#;
        let found = scan_anchor_tags(html, &base());
        assert_eq!(found[0].title, "RSS Feed");
    }

    // --- merge / dedup ---

    #[test]
    fn test_dedup_by_url_keeps_first() {
        let a = FeedCandidate {
            url: "https://example.com/rss.xml".into(),
            title: "From head".into(),
            kind: FeedKind::Rss,
        };
        let b = FeedCandidate {
            url: "https://example.com/rss.xml".into(),
            title: "RSS Feed".into(),
            kind: FeedKind::Rss,
        };
        let c = FeedCandidate {
            url: "https://example.com/atom.xml".into(),
            title: "RSS Feed".into(),
            kind: FeedKind::Atom,
        };
        let merged = dedup_candidates(vec![a.clone(), b, c.clone()]);
        assert_eq!(merged, vec![a, c]);
    }

    // --- probe step (wiremock) ---

    #[tokio::test]
    async fn test_probe_accepts_xml_content_type() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rss.xml"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;
        // Every other path 404s
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let found = probe_conventional_paths(
            &reqwest::Client::new(),
            &base,
            &DiscoveryOptions::default(),
        )
        .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, format!("{}/rss.xml", server.uri()));
        assert_eq!(found[0].kind, FeedKind::Rss);
    }

    #[tokio::test]
    async fn test_probe_rejects_html_content_type() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // A catch-all page that answers 200 text/html for every path
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/html"))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let found = probe_conventional_paths(
            &reqwest::Client::new(),
            &base,
            &DiscoveryOptions::default(),
        )
        .await;

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_probe_failures_do_not_abort_others() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/xml"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let found = probe_conventional_paths(
            &reqwest::Client::new(),
            &base,
            &DiscoveryOptions::default(),
        )
        .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, format!("{}/feed", server.uri()));
    }
}
