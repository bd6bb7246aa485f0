use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, error};

use crate::cli::config::{BrowserFingerprint, BrowserSettings, EgressEndpoint};

/// One scoped browser page resource.
///
/// Opened per fetch attempt and released on every exit path: explicit
/// `close` on success and failure branches, `Drop` as the backstop for
/// unexpected unwinds.
pub struct BrowserSession {
    driver: Option<WebDriver>,
    fingerprint_name: String,
}

/// Signals scraped out of the rendered page alongside its content
#[derive(Debug, Default, Deserialize)]
pub struct PageSignals {
    pub status: Option<u16>,
    pub failed_requests: Vec<String>,
    pub script_errors: Vec<String>,
}

const ERROR_HOOK: &str = r#"
    window.__scriptErrors = window.__scriptErrors || [];
    if (!window.__scriptErrorHook) {
        window.__scriptErrorHook = true;
        window.addEventListener('error', function (e) {
            window.__scriptErrors.push(String((e && e.message) || e));
        });
    }
"#;

const SIGNALS_SCRIPT: &str = r#"
    const nav = performance.getEntriesByType('navigation')[0];
    const status = nav && nav.responseStatus ? nav.responseStatus : null;
    const failed = performance.getEntriesByType('resource')
        .filter(r => r.responseStatus >= 400 ||
                     (r.responseStatus === 0 && r.transferSize === 0 && r.decodedBodySize === 0))
        .map(r => r.name);
    return {
        status: status,
        failed_requests: failed,
        script_errors: window.__scriptErrors || []
    };
"#;

impl BrowserSession {
    /// Open a session against the WebDriver endpoint with the given
    /// fingerprint and egress endpoint applied
    pub async fn open(
        settings: &BrowserSettings,
        fingerprint: &BrowserFingerprint,
        egress: Option<&EgressEndpoint>,
        navigation_timeout: Duration,
    ) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg(&format!("--user-agent={}", fingerprint.user_agent))?;
        caps.add_chrome_arg(&format!(
            "--lang={}",
            fingerprint.accept_language.split(',').next().unwrap_or("en-US")
        ))?;
        caps.add_chrome_arg(&format!(
            "--window-size={},{}",
            fingerprint.viewport.width, fingerprint.viewport.height
        ))?;

        if settings.headless {
            caps.set_headless()?;
        }

        if let Some(proxy_url) = egress.and_then(|e| e.proxy_url()) {
            caps.add_chrome_arg(&format!("--proxy-server={}", proxy_url))?;
        }

        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        caps.add_chrome_option("excludeSwitches", serde_json::json!(["enable-automation"]))?;
        caps.add_chrome_option("useAutomationExtension", serde_json::json!(false))?;

        let driver = WebDriver::new(&settings.webdriver_url, caps)
            .await
            .context("Failed to connect to WebDriver")?;

        driver.set_page_load_timeout(navigation_timeout).await?;

        debug!(fingerprint = %fingerprint.name, "Browser session opened");

        Ok(Self {
            driver: Some(driver),
            fingerprint_name: fingerprint.name.clone(),
        })
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver.as_ref().context("Browser session already closed")
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let driver = self.driver()?;
        debug!(url, fingerprint = %self.fingerprint_name, "Navigating");
        driver
            .goto(url)
            .await
            .context(format!("Failed to navigate to URL: {}", url))?;

        // Install the script error hook as early as possible after load;
        // errors thrown before this point are not observed
        driver.execute(ERROR_HOOK, Vec::new()).await?;

        Ok(())
    }

    /// Get the page source
    pub async fn page_source(&self) -> Result<String> {
        self.driver()?.source().await.context("Failed to get page source")
    }

    /// Get the page title
    pub async fn page_title(&self) -> Result<String> {
        self.driver()?.title().await.context("Failed to get page title")
    }

    /// Visible text of the document body
    pub async fn body_text(&self) -> Result<String> {
        let driver = self.driver()?;
        match driver.find(By::Tag("body")).await {
            Ok(body) => body.text().await.context("Failed to read body text"),
            Err(_) => Ok(String::new()),
        }
    }

    /// Read navigation status, failed sub-requests and collected script
    /// errors out of the rendered page
    pub async fn page_signals(&self) -> Result<PageSignals> {
        let driver = self.driver()?;
        let ret = driver
            .execute(SIGNALS_SCRIPT, Vec::new())
            .await
            .context("Failed to read page signals")?;

        let signals: PageSignals = serde_json::from_value(ret.json().clone())
            .context("Failed to parse page signals")?;

        Ok(signals)
    }

    /// Take a screenshot as PNG bytes
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.driver()?
            .screenshot_as_png()
            .await
            .context("Failed to take screenshot")
    }

    /// Close the session, releasing the browser page
    pub async fn close(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browser session: {}", e);
            }
            debug!("Browser session closed");
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Backstop release for paths that bypassed close()
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}
