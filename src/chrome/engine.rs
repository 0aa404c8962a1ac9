use super::network;
use crate::config::BrowserConfig;
use crate::cookies::CookieSpec;
use crate::engine::{EngineEvent, EngineSettings, RenderingEngine};
use crate::{Result, ScanError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::network::{SetCacheDisabledParams, SetCookieParams};
use chromiumoxide::cdp::browser_protocol::page::SetBypassCspParams;
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 512;

pub(crate) const ISOLATION_ARGS: [&str; 2] = [
    "--disable-site-isolation-trials",
    "--disable-features=IsolateOrigins,site-per-process",
];

/// Headless Chromium driven over the DevTools protocol.
///
/// The browser is launched lazily on first use so a scan without a URL never
/// starts Chrome.
pub struct ChromiumEngine {
    config: BrowserConfig,
    browser: Option<Browser>,
    page: Option<Arc<Page>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ChromiumEngine {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: None,
            page: None,
            tasks: Vec::new(),
            closed: false,
        }
    }

    async fn page(&mut self) -> Result<Arc<Page>> {
        if self.closed {
            return Err(ScanError::EngineClosed);
        }
        if let Some(page) = &self.page {
            return Ok(page.clone());
        }

        let browser = self.launch_browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScanError::Engine(e.to_string()))?;
        let page = Arc::new(page);

        self.browser = Some(browser);
        self.page = Some(page.clone());
        Ok(page)
    }

    async fn launch_browser(&mut self) -> Result<Browser> {
        let chrome_path = self
            .config
            .chrome_path
            .clone()
            .map(Ok)
            .unwrap_or_else(crate::utils::find_chrome_executable)?;

        let mut builder = LaunchConfig::builder()
            .chrome_executable(&chrome_path)
            .request_timeout(Duration::from_secs(self.config.request_timeout_secs))
            .arg("--disable-web-security")
            .arg("--ignore-certificate-errors")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");

        // Keep cross-site frames in the page target, where Fetch interception runs.
        for arg in ISOLATION_ARGS {
            builder = builder.arg(arg);
        }

        if !self.config.headless {
            builder = builder.with_head();
        }

        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(ref dir) = self.config.user_data_dir {
            builder = builder.user_data_dir(dir);
        }

        for arg in &self.config.extra_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(ScanError::LaunchFailed)?;

        tracing::debug!("Launching Chrome from {}", chrome_path.display());
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScanError::LaunchFailed(e.to_string()))?;

        self.tasks
            .push(tokio::spawn(async move { while handler.next().await.is_some() {} }));

        Ok(browser)
    }
}

#[async_trait]
impl RenderingEngine for ChromiumEngine {
    async fn apply_settings(&mut self, settings: &EngineSettings) -> Result<()> {
        let page = self.page().await?;

        page.execute(SetScriptExecutionDisabledParams::new(
            !settings.javascript_enabled,
        ))
        .await
        .map_err(|e| ScanError::Engine(format!("Failed to toggle JavaScript: {}", e)))?;

        page.execute(SetBypassCspParams::new(!settings.web_security))
            .await
            .map_err(|e| ScanError::Engine(format!("Failed to bypass CSP: {}", e)))?;

        page.execute(SetCacheDisabledParams::new(true))
            .await
            .map_err(|e| ScanError::Engine(format!("Failed to disable cache: {}", e)))?;

        tracing::debug!(
            "Engine settings applied: javascript={} web_security={} resource_timeout={}ms",
            settings.javascript_enabled,
            settings.web_security,
            settings.resource_timeout.as_millis()
        );
        Ok(())
    }

    async fn set_cookies(&mut self, cookies: &[CookieSpec]) -> Result<()> {
        let page = self.page().await?;

        let mut applied = 0;
        for cookie in cookies {
            let params = SetCookieParams::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(&cookie.domain)
                .path("/")
                .build();

            match params {
                Ok(params) => match page.execute(params).await {
                    Ok(_) => applied += 1,
                    Err(e) => tracing::warn!("Cookie {} for {} rejected: {}", cookie.name, cookie.domain, e),
                },
                Err(e) => tracing::warn!("Invalid cookie {}: {}", cookie.name, e),
            }
        }

        tracing::debug!("Applied {}/{} cookies", applied, cookies.len());
        Ok(())
    }

    async fn events(&mut self) -> Result<mpsc::Receiver<EngineEvent>> {
        let page = self.page().await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let listeners = network::attach(&page, tx).await?;
        self.tasks.extend(listeners);
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self.page().await?;
        let url = url.to_string();

        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = page.goto(&url).await {
                tracing::debug!("Navigation to {} did not complete: {}", url, e);
            }
        }));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            browser.close().await.ok();
            browser.wait().await.ok();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}
