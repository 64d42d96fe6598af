//! Page capture pipeline
//!
//! A capture launches a fresh browser, prepares the context (cookies),
//! navigates, waits for readiness and screenshots. The browser is released on
//! every exit path and the output file is only written once a screenshot
//! exists.

use crate::raster::persist;
use crate::{
    parse_cookie_string, BrowserOptions, CaptureOptions, Error, Launcher, ReadinessPolicy, Renderer, Result,
};
use log::{debug, info, warn};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Owns a page for the duration of a capture and closes it when dropped.
pub(crate) struct PageGuard<R: Renderer> {
    page: Option<R>,
}

impl<R: Renderer> PageGuard<R> {
    pub(crate) fn new(page: R) -> Self {
        Self { page: Some(page) }
    }

    /// Close the page now, reporting close failures to the caller
    pub(crate) fn release(mut self) -> Result<()> {
        match self.page.take() {
            Some(page) => page.close(),
            None => Ok(()),
        }
    }
}

impl<R: Renderer> Deref for PageGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.page.as_ref().expect("page already released")
    }
}

impl<R: Renderer> DerefMut for PageGuard<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.page.as_mut().expect("page already released")
    }
}

impl<R: Renderer> Drop for PageGuard<R> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close() {
                warn!("Failed to close browser page: {}", e);
            }
        }
    }
}

/// Drive an already launched page through one capture and return PNG bytes.
pub(crate) fn render_page<R: Renderer + ?Sized>(
    page: &mut R,
    url: &str,
    options: &CaptureOptions,
    readiness: &ReadinessPolicy,
) -> Result<Vec<u8>> {
    if let Some(cookie_string) = options.cookies.as_deref() {
        let cookies = parse_cookie_string(cookie_string, url)?;
        if !cookies.is_empty() {
            debug!("Injecting {} cookie(s) for {}", cookies.len(), url);
            page.inject_cookies(&cookies)?;
        }
    }

    debug!("Navigating to {} (timeout {:?})", url, options.timeout());
    page.navigate(url, options.timeout())?;
    page.wait_until_ready(readiness)?;
    page.screenshot(options.full_page)
}

/// Result of a self-heal install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The engine was installed at this executable path
    Executable(PathBuf),
    /// The engine was installed into the fetcher's managed directory
    Managed,
    /// The installer ran; the engine is expected on the default search path
    SystemDefault,
}

impl InstallOutcome {
    fn apply(&self, browser: &mut BrowserOptions) {
        match self {
            InstallOutcome::Executable(path) => browser.executable = Some(path.clone()),
            InstallOutcome::Managed => browser.use_fetched = true,
            InstallOutcome::SystemDefault => {}
        }
    }
}

/// Installs the rendering engine when it is missing
pub trait EngineInstaller: Send + Sync {
    fn install(&self) -> Result<InstallOutcome>;
}

/// Installs the engine by running an external command, e.g. a package
/// manager invocation.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    executable: Option<PathBuf>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            executable: None,
        }
    }

    /// Executable the command is known to install
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }
}

impl EngineInstaller for CommandInstaller {
    fn install(&self) -> Result<InstallOutcome> {
        info!("Installing rendering engine: {} {}", self.program, self.args.join(" "));
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|e| Error::EngineUnavailableError(format!("failed to run installer '{}': {}", self.program, e)))?;
        if !status.success() {
            return Err(Error::EngineUnavailableError(format!(
                "installer '{}' exited with {}",
                self.program, status
            )));
        }
        Ok(match &self.executable {
            Some(path) => InstallOutcome::Executable(path.clone()),
            None => InstallOutcome::SystemDefault,
        })
    }
}

/// Retry policy for a missing engine: install once, then retry the whole
/// capture once. Any other error, or any error after the retry, is final.
#[derive(Default)]
pub struct CaptureRetry {
    installer: Option<Box<dyn EngineInstaller>>,
}

impl CaptureRetry {
    /// Never self-heal
    pub fn none() -> Self {
        Self { installer: None }
    }

    pub fn install_with(installer: impl EngineInstaller + 'static) -> Self {
        Self {
            installer: Some(Box::new(installer)),
        }
    }

    fn run<T>(&self, options: &CaptureOptions, mut attempt: impl FnMut(&CaptureOptions) -> Result<T>) -> Result<T> {
        let err = match attempt(options) {
            Err(e) if e.is_engine_missing() => e,
            other => return other,
        };

        let installer = match &self.installer {
            Some(installer) => installer,
            None => return Err(err),
        };

        warn!("{}; attempting to install the rendering engine", err);
        let outcome = installer.install().map_err(|install_err| {
            Error::EngineUnavailableError(format!("{} (self-heal failed: {})", err, install_err))
        })?;

        let mut healed = options.clone();
        outcome.apply(&mut healed.browser);
        attempt(&healed).map_err(|retry_err| match retry_err {
            Error::EngineUnavailableError(reason) => {
                Error::EngineUnavailableError(format!("still unavailable after install: {}", reason))
            }
            other => other,
        })
    }
}

/// Captures pages with a [`Launcher`], one fresh browser per capture.
pub struct Capturer<L: Launcher> {
    launcher: L,
    retry: CaptureRetry,
    readiness: Option<ReadinessPolicy>,
}

impl<L: Launcher> Capturer<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            retry: CaptureRetry::none(),
            readiness: None,
        }
    }

    pub fn with_retry(mut self, retry: CaptureRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the readiness policy derived from [`CaptureOptions`]
    pub fn with_readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = Some(policy);
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Capture `url` to `output` as PNG and return the output path.
    pub fn capture(&self, url: &str, output: &Path, options: &CaptureOptions) -> Result<PathBuf> {
        options.validate()?;
        let png = self.retry.run(options, |opts| self.capture_once(url, opts))?;
        persist(output, &png)?;
        info!("Captured {} -> {}", url, output.display());
        Ok(output.to_path_buf())
    }

    fn capture_once(&self, url: &str, options: &CaptureOptions) -> Result<Vec<u8>> {
        let page = self.launcher.launch(options.viewport, &options.browser)?;
        let mut guard = PageGuard::new(page);

        let readiness = match &self.readiness {
            Some(policy) => policy.clone(),
            None => ReadinessPolicy::for_capture(options),
        };
        let png = render_page(&mut *guard, url, options, &readiness)?;

        if let Err(e) = guard.release() {
            warn!("Failed to close browser after capturing {}: {}", url, e);
        }
        Ok(png)
    }
}

#[cfg(feature = "cdp")]
impl Capturer<crate::cdp::CdpLauncher> {
    /// Headless Chrome capturer; self-heals by fetching Chromium when the
    /// `fetch` feature is enabled.
    pub fn cdp() -> Self {
        let capturer = Self::new(crate::cdp::CdpLauncher::new());
        #[cfg(feature = "fetch")]
        let capturer = capturer.with_retry(CaptureRetry::install_with(crate::cdp::ChromiumFetcher::new()));
        capturer
    }
}

/// Capture `url` to `output` with headless Chrome.
#[cfg(feature = "cdp")]
pub fn capture(url: &str, output: &Path, options: &CaptureOptions) -> Result<PathBuf> {
    Capturer::cdp().capture(url, output, options)
}
