//! Discovery service
//!
//! Proposes the initial candidate set for a source before crawling begins.
//! Looks for a plaintext link manifest (`llms.txt`) next to the root and at
//! the origin, then for `sitemap.xml` (following one level of sitemap
//! index). Network failures degrade to an empty candidate list.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::{build_http_client, markdown_links};
use crate::url::resolve_url;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use url::Url;

/// Child sitemaps fetched from a sitemap index
const MAX_CHILD_SITEMAPS: usize = 50;

/// Result of discovery for one root URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Deduplicated candidate URLs, in discovery order
    pub urls: Vec<Url>,
    /// The manifest that was found, if any
    pub manifest_url: Option<Url>,
    pub manifest_found: bool,
    pub sitemap_found: bool,
}

/// Proposes candidate URLs for a root
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, root: &Url) -> Discovery;
}

/// Discovery over HTTP
pub struct HttpDiscoverer {
    client: Client,
}

impl HttpDiscoverer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a discoverer sharing the crawler's user agent and proxy
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }

    async fn fetch_text(&self, url: &Url) -> Option<String> {
        match self.client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to read discovery response");
                    None
                }
            },
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "Not found during discovery");
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Discovery request failed");
                None
            }
        }
    }

    async fn find_manifest(&self, root: &Url) -> Option<(Url, Vec<Url>)> {
        for candidate in manifest_candidates(root) {
            let Some(text) = self.fetch_text(&candidate).await else {
                continue;
            };
            // SPA servers answer every path with their index page
            if text.trim_start().starts_with('<') {
                debug!(url = %candidate, "Ignoring HTML served as manifest");
                continue;
            }
            let links = parse_manifest_links(&text, &candidate);
            return Some((candidate, links));
        }
        None
    }

    async fn read_sitemap(&self, root: &Url) -> Option<Vec<Url>> {
        let sitemap_url = root.join("/sitemap.xml").ok()?;
        let xml = self.fetch_text(&sitemap_url).await?;

        let sitemap = match parse_sitemap(&xml) {
            Ok(sitemap) => sitemap,
            Err(e) => {
                warn!(url = %sitemap_url, error = %e, "Malformed sitemap");
                return None;
            }
        };

        let locs = match sitemap.kind {
            SitemapKind::UrlSet => sitemap.locs,
            SitemapKind::Index => {
                let mut locs = Vec::new();
                for child in sitemap.locs.iter().take(MAX_CHILD_SITEMAPS) {
                    let Ok(child_url) = Url::parse(child) else {
                        continue;
                    };
                    let Some(child_xml) = self.fetch_text(&child_url).await else {
                        continue;
                    };
                    match parse_sitemap(&child_xml) {
                        Ok(child) if child.kind == SitemapKind::UrlSet => locs.extend(child.locs),
                        Ok(_) => debug!(url = %child_url, "Ignoring nested sitemap index"),
                        Err(e) => warn!(url = %child_url, error = %e, "Malformed child sitemap"),
                    }
                }
                locs
            }
        };

        Some(locs.iter().filter_map(|loc| Url::parse(loc).ok()).collect())
    }
}

#[async_trait]
impl Discoverer for HttpDiscoverer {
    async fn discover(&self, root: &Url) -> Discovery {
        let mut discovery = Discovery::default();
        let mut seen = HashSet::new();

        if let Some((manifest_url, links)) = self.find_manifest(root).await {
            discovery.manifest_found = true;
            discovery.manifest_url = Some(manifest_url);
            for link in links {
                if seen.insert(link.to_string()) {
                    discovery.urls.push(link);
                }
            }
        }

        if let Some(urls) = self.read_sitemap(root).await {
            discovery.sitemap_found = true;
            for url in urls {
                if seen.insert(url.to_string()) {
                    discovery.urls.push(url);
                }
            }
        }

        info!(
            root = %root,
            urls = discovery.urls.len(),
            manifest = discovery.manifest_found,
            sitemap = discovery.sitemap_found,
            "Discovery finished"
        );
        discovery
    }
}

/// Manifest locations to try, most specific first
pub fn manifest_candidates(root: &Url) -> Vec<Url> {
    let mut candidates = Vec::new();

    let dir = root.path().trim_end_matches('/');
    if let Ok(url) = root.join(&format!("{}/llms.txt", dir)) {
        candidates.push(url);
    }
    if let Ok(url) = root.join("/llms.txt") {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }

    candidates
}

fn bare_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s<>()\[\]"'`]+"#).ok())
        .as_ref()
}

/// Extracts links from a manifest: markdown links first, then bare URLs
pub fn parse_manifest_links(text: &str, base_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links: Vec<Url> = markdown_links(text, base_url)
        .into_iter()
        .filter(|url| seen.insert(url.to_string()))
        .collect();

    if let Some(pattern) = bare_url_pattern() {
        for found in pattern.find_iter(text) {
            let raw = found.as_str().trim_end_matches(['.', ',', ';', ':']);
            if let Some(url) = resolve_url(raw, base_url) {
                if seen.insert(url.to_string()) {
                    links.push(url);
                }
            }
        }
    }

    links
}

/// Whether a sitemap document lists pages or other sitemaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    UrlSet,
    Index,
}

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sitemap {
    pub kind: SitemapKind,
    pub locs: Vec<String>,
}

/// Parses a `<urlset>` or `<sitemapindex>` document
pub fn parse_sitemap(xml: &str) -> Result<Sitemap, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut kind = SitemapKind::UrlSet;
    let mut locs = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sitemapindex" => kind = SitemapKind::Index,
                b"loc" => in_loc = true,
                _ => {}
            },
            Event::End(e) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Event::Text(text) if in_loc => {
                let loc = text.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            Event::CData(data) if in_loc => {
                let loc = String::from_utf8_lossy(&data).trim().to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Sitemap { kind, locs })
}
