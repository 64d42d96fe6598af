//! Chrome DevTools Protocol backend

#[cfg(feature = "fetch")]
use crate::capture::{EngineInstaller, InstallOutcome};
use crate::{BrowserOptions, CookieParam, Error, Launcher, ReadyState, Renderer, Result, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Silence after which headless_chrome considers the browser hung
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Stand-in for "no navigation bound"; headless_chrome needs a finite wait
const UNBOUNDED_NAVIGATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Launches one headless Chrome process per capture
#[derive(Debug, Clone, Default)]
pub struct CdpLauncher;

impl CdpLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for CdpLauncher {
    type Page = CdpPage;

    fn launch(&self, viewport: Viewport, options: &BrowserOptions) -> Result<CdpPage> {
        CdpPage::launch(viewport, options)
    }
}

/// A headless Chrome process with a single tab.
///
/// Dropping the page terminates the browser process.
pub struct CdpPage {
    browser: Browser,
    tab: Arc<Tab>,
}

impl CdpPage {
    fn launch(viewport: Viewport, options: &BrowserOptions) -> Result<Self> {
        let executable = resolve_executable(options)?;
        let args: Vec<&OsStr> = options.args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(options.sandbox)
            .window_size(Some((viewport.width, viewport.height)))
            .path(executable)
            .args(args)
            .idle_browser_timeout(options.idle_timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_IDLE_TIMEOUT))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        if let Some(user_agent) = &options.user_agent {
            tab.set_user_agent(user_agent, None, None)
                .map_err(|e| Error::InitializationError(format!("Failed to set user agent: {}", e)))?;
        }

        if !options.headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: std::collections::HashMap<&str, &str> = options
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            tab.set_extra_http_headers(headers)
                .map_err(|e| Error::InitializationError(format!("Failed to set headers: {}", e)))?;
        }

        debug!("Launched headless browser with viewport {}x{}", viewport.width, viewport.height);
        Ok(Self { browser, tab })
    }

    fn evaluate_value(&self, expression: &str) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| Error::RenderError(format!("Evaluation failed: {}", e)))?;
        result
            .value
            .ok_or_else(|| Error::RenderError(format!("No value returned from '{}'", expression)))
    }

    /// Size of the scrollable document in CSS pixels
    fn document_size(&self) -> Result<(f64, f64)> {
        let value = self.evaluate_value(
            r#"JSON.stringify([
                Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
                Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)
            ])"#,
        )?;
        let raw = value
            .as_str()
            .ok_or_else(|| Error::RenderError(format!("Unexpected document size value: {}", value)))?;
        serde_json::from_str::<(f64, f64)>(raw)
            .map_err(|e| Error::RenderError(format!("Malformed document size '{}': {}", raw, e)))
    }
}

/// Explicit executable, the fetcher's managed build, or the system browser.
///
/// `None` lets headless_chrome resolve (and with `fetch`, download) a build.
fn resolve_executable(options: &BrowserOptions) -> Result<Option<std::path::PathBuf>> {
    if let Some(path) = &options.executable {
        if !path.exists() {
            return Err(Error::EngineUnavailableError(format!(
                "browser executable {} does not exist",
                path.display()
            )));
        }
        return Ok(Some(path.clone()));
    }
    if options.use_fetched {
        return Ok(None);
    }
    headless_chrome::browser::default_executable()
        .map(Some)
        .map_err(Error::EngineUnavailableError)
}

fn is_timeout_message(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout") || msg.contains("timed out") || msg.contains("never came")
}

impl Renderer for CdpPage {
    fn inject_cookies(&mut self, cookies: &[CookieParam]) -> Result<()> {
        use headless_chrome::protocol::cdp::Network::CookieParam as NetCookieParam;
        let net_cookies = cookies
            .iter()
            .map(|c| NetCookieParam {
                name: c.name.clone(),
                value: c.value.clone(),
                url: c.url.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                secure: None,
                http_only: None,
                same_site: None,
                expires: None,
                priority: None,
                same_party: None,
                source_scheme: None,
                source_port: None,
                partition_key: None,
            })
            .collect();

        self.tab.set_cookies(net_cookies)?;
        Ok(())
    }

    fn navigate(&mut self, url: &str, bound: Option<Duration>) -> Result<()> {
        let timeout = bound.unwrap_or(UNBOUNDED_NAVIGATION);
        self.tab.set_default_timeout(timeout);
        let started = Instant::now();
        let classify = |e: anyhow::Error, what: &str| {
            if is_timeout_message(&e) || started.elapsed() >= timeout {
                Error::CaptureTimeoutError(timeout.as_millis() as u64)
            } else {
                Error::LoadError(format!("{} {}: {}", what, url, e))
            }
        };

        self.tab
            .navigate_to(url)
            .map_err(|e| classify(e, "Navigation failed for"))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| classify(e, "Wait for navigation failed for"))?;
        Ok(())
    }

    fn resource_count(&mut self) -> Result<u64> {
        let value = self.evaluate_value("performance.getEntriesByType('resource').length")?;
        value
            .as_u64()
            .ok_or_else(|| Error::RenderError(format!("Unexpected resource count: {}", value)))
    }

    fn ready_state(&mut self) -> Result<ReadyState> {
        let value = self.evaluate_value("document.readyState")?;
        match value.as_str() {
            Some(state) => state.parse(),
            None => Err(Error::RenderError(format!("Unexpected readyState: {}", value))),
        }
    }

    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>> {
        let clip = if full_page {
            let (width, height) = self.document_size()?;
            Some(Page::Viewport {
                x: 0.0,
                y: 0.0,
                width,
                height,
                scale: 1.0,
            })
        } else {
            None
        };

        // Tab::capture_screenshot never asks Chrome to paint past the
        // viewport, so a document-sized clip would come back blank below it
        let data = self
            .tab
            .call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip,
                from_surface: Some(true),
                capture_beyond_viewport: Some(full_page),
                optimize_for_speed: None,
            })
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?
            .data;
        Base64Engine::decode(&base64::engine::general_purpose::STANDARD, data)
            .map_err(|e| Error::RenderError(format!("Malformed screenshot payload: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the child process
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

/// Self-heal installer that downloads a Chromium build into headless_chrome's
/// managed directory.
#[cfg(feature = "fetch")]
#[derive(Debug, Clone, Default)]
pub struct ChromiumFetcher;

#[cfg(feature = "fetch")]
impl ChromiumFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "fetch")]
impl EngineInstaller for ChromiumFetcher {
    fn install(&self) -> Result<InstallOutcome> {
        log::info!("Fetching a Chromium build for headless capture");
        // Without an explicit path headless_chrome downloads the pinned
        // revision before starting it
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .path(None)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build launch options: {}", e)))?;
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::EngineUnavailableError(format!("Chromium download failed: {}", e)))?;
        drop(browser);
        Ok(InstallOutcome::Managed)
    }
}
