//! Headless rendering through a Browserless-compatible `/content` API
//!
//! The renderer is scoped to one ingestion run: acquired before the crawl
//! loop starts and closed once the loop ends, on every exit path.

use crate::config::HeadlessConfig;
use crate::crawler::fetcher::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A JavaScript-executing page renderer
#[async_trait]
pub trait HeadlessRenderer: Send + Sync {
    /// Returns the fully rendered HTML for a URL
    async fn render(&self, url: &Url) -> Result<String, FetchError>;

    /// Releases the renderer; later renders fail
    async fn close(&self) -> Result<(), FetchError>;
}

/// Client for a Browserless `/content` endpoint
pub struct BrowserlessRenderer {
    client: Client,
    base_url: String,
    token: Option<String>,
    closed: AtomicBool,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates the renderer when headless rendering is enabled
    pub fn from_config(
        config: &HeadlessConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, FetchError> {
        match (&config.endpoint, config.enabled) {
            (Some(endpoint), true) => {
                Self::new(endpoint, config.token.as_deref(), timeout).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl HeadlessRenderer for BrowserlessRenderer {
    async fn render(&self, url: &Url) -> Result<String, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Render("renderer already closed".to_string()));
        }

        let body = serde_json::json!({ "url": url.as_str() });
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Render(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Render(format!(
                "renderer returned {}: {}",
                status.as_u16(),
                message.trim()
            )));
        }

        resp.text()
            .await
            .map_err(|e| FetchError::Render(e.to_string()))
    }

    async fn close(&self) -> Result<(), FetchError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.base_url, "Headless renderer released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_disabled_config_creates_nothing() {
        let config = HeadlessConfig::default();
        let renderer = BrowserlessRenderer::from_config(&config, Duration::from_secs(5)).unwrap();
        assert!(renderer.is_none());
    }

    #[tokio::test]
    async fn test_render_posts_url_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .and(query_param("token", "secret"))
            .and(body_json(serde_json::json!({ "url": "https://example.com/app" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rendered</html>"))
            .mount(&server)
            .await;

        let base = format!("{}/", server.uri());
        let renderer =
            BrowserlessRenderer::new(&base, Some("secret"), Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://example.com/app").unwrap();

        assert_eq!(renderer.render(&url).await.unwrap(), "<html>rendered</html>");
    }

    #[tokio::test]
    async fn test_render_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let renderer = BrowserlessRenderer::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let url = Url::parse("https://example.com/").unwrap();
        let err = renderer.render(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::Render(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_closed_renderer_refuses_work() {
        let renderer =
            BrowserlessRenderer::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        renderer.close().await.unwrap();
        renderer.close().await.unwrap();

        let url = Url::parse("https://example.com/").unwrap();
        assert!(renderer.render(&url).await.is_err());
    }
}
