//! Page fetcher implementation
//!
//! This module turns one URL into a normalized document payload:
//! - Building the HTTP client (user agent, timeout, proxy, compression)
//! - GET requests with status classification
//! - HTML to markdown conversion, title and link extraction
//! - Verbatim handling of markdown and plain-text bodies
//! - Delegation to the headless renderer when a page needs JavaScript

use crate::config::CrawlerConfig;
use crate::crawler::discovery::parse_manifest_links;
use crate::crawler::gate::{sanitized_len, GateRejection};
use crate::crawler::renderer::HeadlessRenderer;
use crate::url::{normalize_url, resolve_url};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{redirect::Policy, Client, Proxy};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Elements dropped before HTML is converted to markdown
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "svg", "iframe",
];

/// Mount points left behind by client-side frameworks
const APP_SHELL_MARKERS: &[&str] = &[
    "id=\"root\"",
    "id=\"app\"",
    "id=\"__next\"",
    "id=\"__nuxt\"",
    "id=\"___gatsby\"",
    "data-reactroot",
    "ng-app",
];

/// Below this much text, an HTML page with an app mount point is re-rendered
const APP_SHELL_MAX_CHARS: usize = 200;

/// Errors raised while fetching or converting a single page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Headless render failed: {0}")]
    Render(String),

    #[error("Headless rendering required but no renderer is available")]
    RendererUnavailable,

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Rejected(#[from] GateRejection),

    #[error("Page task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Returns true for outcomes that are skips rather than page failures
    ///
    /// "Not found", "gone" and content-gate rejections are skips.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            FetchError::Status {
                status: 404 | 410,
                ..
            } | FetchError::Rejected(_)
        )
    }
}

/// Per-run fetch settings
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Always render through the headless renderer
    pub force_headless: bool,
    /// Renderer scoped to the current ingestion run
    pub renderer: Option<Arc<dyn HeadlessRenderer>>,
}

/// A fetched and converted page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Markdown-like content
    pub content: String,
    pub title: Option<String>,
    /// Canonical relative path (path plus query)
    pub path: String,
    /// Absolute outbound links
    pub links: Vec<String>,
}

/// Fetches pages and link manifests
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches and converts one page
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<FetchedPage, FetchError>;

    /// Fetches a link manifest and returns the absolute URLs it lists
    async fn fetch_manifest(&self, url: &Url) -> Result<Vec<String>, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. bad proxy)
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// Plain HTTP fetcher with headless fallback
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds the fetcher from crawler configuration
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn render(
        &self,
        renderer: &Arc<dyn HeadlessRenderer>,
        url: &Url,
    ) -> Result<FetchedPage, FetchError> {
        let html = renderer.render(url).await?;
        page_from_html(&html, url)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        if options.force_headless {
            let renderer = options
                .renderer
                .as_ref()
                .ok_or(FetchError::RendererUnavailable)?;
            debug!(url = %url, "Rendering page headlessly");
            return self.render(renderer, url).await;
        }

        let response = self.get(url).await?;
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.text().await?;

        if is_text_type(&content_type) {
            return Ok(page_from_markdown(&body, &final_url));
        }

        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::UnsupportedContent(content_type));
        }

        let page = page_from_html(&body, &final_url)?;
        if let Some(renderer) = &options.renderer {
            if looks_like_app_shell(&body, &page.content) {
                debug!(url = %final_url, "Page looks client-rendered, retrying headlessly");
                match self.render(renderer, &final_url).await {
                    Ok(rendered) => return Ok(rendered),
                    Err(e) => warn!(url = %final_url, error = %e, "Headless fallback failed"),
                }
            }
        }
        Ok(page)
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<Vec<String>, FetchError> {
        let response = self.get(url).await?;
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(parse_manifest_links(&body, &final_url)
            .into_iter()
            .map(String::from)
            .collect())
    }
}

fn is_text_type(content_type: &str) -> bool {
    content_type.starts_with("text/markdown")
        || content_type.starts_with("text/x-markdown")
        || content_type.starts_with("text/plain")
}

/// Canonical document path for a URL: normalized path plus query
pub fn canonical_path(url: &Url) -> String {
    let normalized = normalize_url(url.as_str()).unwrap_or_else(|_| url.clone());
    match normalized.query() {
        Some(query) => format!("{}?{}", normalized.path(), query),
        None => normalized.path().to_string(),
    }
}

/// Converts an HTML document into a fetched page
pub fn page_from_html(html: &str, base_url: &Url) -> Result<FetchedPage, FetchError> {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let links = extract_links(&document, base_url);
    let main_html = main_content_html(&document).unwrap_or_else(|| html.to_string());
    drop(document);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    let content = converter
        .convert(&main_html)
        .map_err(|e| FetchError::Conversion(e.to_string()))?;

    Ok(FetchedPage {
        content: content.trim().to_string(),
        title,
        path: canonical_path(base_url),
        links,
    })
}

/// Keeps a markdown or plain-text body verbatim
pub fn page_from_markdown(body: &str, base_url: &Url) -> FetchedPage {
    let title = body
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty());

    FetchedPage {
        content: body.trim().to_string(),
        title,
        path: canonical_path(base_url),
        links: markdown_links(body, base_url)
            .into_iter()
            .map(String::from)
            .collect(),
    }
}

/// Returns true if an HTML page is a client-rendered shell with no real text
pub fn looks_like_app_shell(html: &str, converted: &str) -> bool {
    sanitized_len(converted) < APP_SHELL_MAX_CHARS
        && APP_SHELL_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Extracts the page title from `<title>`, falling back to the first `<h1>`
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Returns the outer HTML of the main content region, if the page marks one
fn main_content_html(document: &Html) -> Option<String> {
    let selector = Selector::parse("main, article, [role='main']").ok()?;
    document.select(&selector).next().map(|element| element.html())
}

/// Extracts all followable links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Download links are never pages
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_url(href, base_url))
            {
                let url = url.to_string();
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
        }
    }

    links
}

fn markdown_link_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).ok())
        .as_ref()
}

/// Resolves every `[text](target)` link in markdown against `base_url`
pub fn markdown_links(text: &str, base_url: &Url) -> Vec<Url> {
    let Some(pattern) = markdown_link_pattern() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|target| resolve_url(target.as_str(), base_url))
        .filter(|url| seen.insert(url.to_string()))
        .collect()
}
