//! DuckDuckGo HTML search and page fetching over plain HTTP.

use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::VerifyError;
use crate::matching::is_candidate_url;

pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Result links read from one search page.
const MAX_RESULTS: usize = 12;
/// Fewer result-class links than this and every link on the page is used.
const MIN_RESULT_LINKS: usize = 5;
/// Links considered in the fallback scan.
const MAX_FALLBACK_LINKS: usize = 30;
/// Result page bytes read before the rest of the body is dropped.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>").expect("anchor pattern is valid"));

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("href pattern is valid")
});

static RESULT_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bclass\s*=\s*["'][^"']*\bresult__a\b"#).expect("class pattern is valid")
});

static NON_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<nav\b.*?</nav\s*>|<footer\b.*?</footer\s*>|<!--.*?-->",
    )
    .expect("non-content pattern is valid")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

/// HTTP client for search queries and result pages.
pub struct SearchClient {
    client: reqwest::Client,
    search_url: Url,
}

impl SearchClient {
    pub fn new(search_url: &str, timeout: Duration) -> Result<Self, VerifyError> {
        let search_url = Url::parse(search_url).map_err(|e| VerifyError::InvalidUrl {
            url: search_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(search_url.scheme(), "http" | "https") {
            return Err(VerifyError::InvalidUrl {
                url: search_url.to_string(),
                reason: "scheme must be http or https".into(),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, search_url })
    }

    /// Run one query and return candidate result URLs in page order.
    pub async fn search(&self, query: &str) -> Result<Vec<String>, VerifyError> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut().append_pair("q", query);

        info!(query, "searching");
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if is_block_status(status) {
            warn!(query, status = status.as_u16(), "search blocked");
            return Err(VerifyError::blocked(format!("HTTP {}", status.as_u16())));
        }
        if resp.url().path().contains("static-pages") {
            warn!(query, url = %resp.url(), "search redirected to error page");
            return Err(VerifyError::blocked(format!("redirected to {}", resp.url())));
        }
        if !status.is_success() {
            return Err(VerifyError::Server {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await?;
        if body.contains("anomaly-modal") || body.contains("Unexpected error") {
            warn!(query, "search returned anomaly page");
            return Err(VerifyError::blocked("anomaly page"));
        }

        let urls = extract_result_urls(&body);
        debug!(query, count = urls.len(), "search results");
        Ok(urls)
    }

    /// Fetch a result page as plain text. Load failures and non-HTML bodies
    /// are `None`; at most `MAX_PAGE_BYTES` of the body are read.
    pub async fn fetch_text(&self, url: &str) -> Option<String> {
        let mut resp = match self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url, error = %e, "page failed to load");
                return None;
            }
        };
        if resp.status().as_u16() >= 400 {
            debug!(url, status = resp.status().as_u16(), "page returned error status");
            return None;
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if !is_text_content(content_type) {
            debug!(url, content_type, "skipping non-HTML page");
            return None;
        }

        let mut body = Vec::new();
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    let room = MAX_PAGE_BYTES - body.len();
                    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if body.len() >= MAX_PAGE_BYTES {
                        debug!(url, limit = MAX_PAGE_BYTES, "page body truncated");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(url, error = %e, "page body failed to load");
                    return None;
                }
            }
        }

        let text = html_to_text(&String::from_utf8_lossy(&body));
        if text.is_empty() { None } else { Some(text) }
    }
}

/// HTML and plain-text pages are scanned. A missing content type is
/// treated as HTML.
fn is_text_content(content_type: Option<&str>) -> bool {
    let Some(value) = content_type else {
        return true;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(mime.as_str(), "text/html" | "application/xhtml+xml" | "text/plain" | "")
}

fn is_block_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 202 | 403 | 418 | 429)
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
}

/// Candidate URLs from a DuckDuckGo HTML results page.
///
/// Prefers links with the `result__a` class; with fewer than five of
/// those, every link on the page is scanned too. Redirect links
/// (`/l/?uddg=...`) are resolved to their target.
pub fn extract_result_urls(html: &str) -> Vec<String> {
    let anchors: Vec<(bool, String)> = ANCHOR
        .captures_iter(html)
        .filter_map(|c| {
            let attrs = c.get(1)?.as_str();
            let href = HREF.captures(attrs)?;
            let raw = href.get(1).or_else(|| href.get(2))?.as_str();
            Some((RESULT_CLASS.is_match(attrs), decode_entities(raw)))
        })
        .collect();

    let mut urls: Vec<String> = Vec::new();
    for (_, href) in anchors.iter().filter(|(result, _)| *result) {
        if urls.len() >= MAX_RESULTS {
            break;
        }
        if let Some(url) = resolve_result_link(href).filter(|u| !urls.contains(u)) {
            urls.push(url);
        }
    }

    if urls.len() < MIN_RESULT_LINKS {
        for (_, href) in anchors.iter().take(MAX_FALLBACK_LINKS) {
            if urls.len() >= MAX_RESULTS {
                break;
            }
            if let Some(url) = resolve_result_link(href).filter(|u| !urls.contains(u)) {
                urls.push(url);
            }
        }
    }
    urls
}

/// Turn a result `href` into a candidate URL, unwrapping DuckDuckGo's
/// redirect links.
pub fn resolve_result_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    let target = if is_redirect {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?
    } else {
        absolute
    };

    is_candidate_url(&target).then_some(target)
}

/// Visible text of an HTML page: scripts, styles, navigation, and footers
/// removed, tags replaced by spaces, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let stripped = NON_CONTENT.replace_all(html, " ");
    let stripped = TAG.replace_all(&stripped, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
