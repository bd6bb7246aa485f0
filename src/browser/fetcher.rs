use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::browser::session::BrowserSession;
use crate::cli::config::{BrowserFingerprint, BrowserSettings, EgressEndpoint};

/// Everything one fetch attempt observed about a page
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    /// Status of the main document response, when the browser exposes it
    pub http_status: Option<u16>,
    pub title: String,
    pub body_text: String,
    pub html: String,
    pub script_errors: Vec<String>,
    pub failed_requests: Vec<String>,
    /// Saved screenshot artifact, when capture is enabled
    pub screenshot: Option<PathBuf>,
}

/// Why a fetch attempt produced no page
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("navigation timed out after {0} seconds")]
    Timeout(u64),

    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The browser resource itself could not be acquired. Distinct from a
    /// page fetch failure: this is crawler infrastructure, not the target
    /// site.
    #[error("browser session unavailable: {0}")]
    Session(String),
}

/// Fetches a rendered page through some browser, one scoped page resource
/// per call
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        egress: Option<&EgressEndpoint>,
        fingerprint: &BrowserFingerprint,
    ) -> Result<FetchedPage, FetchError>;
}

/// WebDriver-backed fetcher
pub struct WebDriverFetcher {
    settings: BrowserSettings,
    navigation_timeout: Duration,
}

impl WebDriverFetcher {
    pub fn new(settings: BrowserSettings, navigation_timeout: Duration) -> Self {
        Self {
            settings,
            navigation_timeout,
        }
    }

    async fn capture(
        &self,
        session: &BrowserSession,
        url: &str,
    ) -> Result<FetchedPage, anyhow::Error> {
        session.navigate(url).await?;

        let title = session.page_title().await?;
        let html = session.page_source().await?;
        let body_text = session.body_text().await?;
        let signals = session.page_signals().await.unwrap_or_default();

        let screenshot = match &self.settings.screenshot_dir {
            Some(dir) => self.save_screenshot(session, dir, url).await,
            None => None,
        };

        Ok(FetchedPage {
            http_status: signals.status,
            title,
            body_text,
            html,
            script_errors: signals.script_errors,
            failed_requests: signals.failed_requests,
            screenshot,
        })
    }

    /// Screenshots are best-effort artifacts; failures are logged, never
    /// propagated
    async fn save_screenshot(
        &self,
        session: &BrowserSession,
        dir: &PathBuf,
        url: &str,
    ) -> Option<PathBuf> {
        let png = match session.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(url, "Screenshot capture failed: {}", e);
                return None;
            }
        };

        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "page".to_string());
        let path = dir.join(format!("{}-{}.png", host, Utc::now().timestamp_millis()));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Failed to create screenshot directory: {}", e);
            return None;
        }
        if let Err(e) = tokio::fs::write(&path, png).await {
            warn!("Failed to save screenshot: {}", e);
            return None;
        }

        debug!(path = %path.display(), "Screenshot saved");
        Some(path)
    }
}

#[async_trait]
impl PageFetcher for WebDriverFetcher {
    async fn fetch(
        &self,
        url: &str,
        egress: Option<&EgressEndpoint>,
        fingerprint: &BrowserFingerprint,
    ) -> Result<FetchedPage, FetchError> {
        let mut session =
            BrowserSession::open(&self.settings, fingerprint, egress, self.navigation_timeout)
                .await
                .map_err(|e| FetchError::Session(e.to_string()))?;

        let outcome =
            tokio::time::timeout(self.navigation_timeout, self.capture(&session, url)).await;

        // The session is released on every branch before returning
        let result = match outcome {
            Err(_) => Err(FetchError::Timeout(self.navigation_timeout.as_secs())),
            Ok(Err(e)) => Err(FetchError::Navigation(e.to_string())),
            Ok(Ok(page)) => Ok(page),
        };

        let _ = session.close().await;
        result
    }
}
