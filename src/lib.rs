//! Screenshot Compare
//!
//! Visual regression comparison for web pages and raster images: render two
//! targets to pixels, score their difference and write a diff image for review.
//!
//! # Features
//!
//! - **CDP Backend** (default): captures pages with headless Chrome
//! - **Pluggable renderers**: any type implementing [`Renderer`] can be driven
//!   by the capture pipeline, which keeps tests deterministic
//! - **Perceptual diffing**: YIQ color distance with anti-aliasing detection
//!
//! # Example
//!
//! ```no_run
//! use screenshot_compare::{compare, CompareOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let result = compare(
//!     Path::new("baseline.png"),
//!     Path::new("current.png"),
//!     Some(Path::new("diff.png")),
//!     &CompareOptions::default(),
//! )?;
//! println!("{}% different, passed: {}", result.diff_percentage, result.passed);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod compare;
pub mod diff;
pub mod normalize;
pub mod raster;
pub mod readiness;
pub mod report;
pub mod session;

// Chrome DevTools Protocol backend
#[cfg(feature = "cdp")]
pub mod cdp;

pub use capture::{Capturer, CaptureRetry, CommandInstaller, EngineInstaller, InstallOutcome};
pub use compare::{
    compare, compare_images, compare_targets, compare_targets_async, compare_targets_with_progress, ArtifactPaths,
    CompareOutcome, CompareResult, Progress, TargetOptions, Targets,
};
pub use raster::RasterImage;
pub use readiness::{ReadinessPolicy, WaitStrategy};
pub use report::{ConsoleReporter, JsonReporter, Reporter};
pub use session::BrowserSession;

#[cfg(feature = "cdp")]
pub use capture::capture;

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_WAIT_AFTER_LOAD_MS: u64 = 2_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_NETWORK_IDLE_MS: u64 = 500;
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Browser launch and context overrides
///
/// Defaults launch a sandboxed headless browser found on the system. When
/// `executable` is set it is used as-is and never auto-detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Explicit browser executable
    pub executable: Option<PathBuf>,
    /// Resolve the browser from the fetcher's managed install directory
    /// instead of the system (set after a successful self-heal)
    pub use_fetched: bool,
    pub headless: bool,
    pub sandbox: bool,
    /// Extra command line arguments for the browser process
    pub args: Vec<String>,
    /// User agent override for the browsing context
    pub user_agent: Option<String>,
    /// Extra HTTP headers sent with every request of the context
    pub headers: HashMap<String, String>,
    /// How long the browser may stay silent before it is considered hung
    pub idle_timeout_ms: Option<u64>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            executable: None,
            use_fetched: false,
            headless: true,
            sandbox: true,
            args: Vec::new(),
            user_agent: None,
            headers: HashMap::new(),
            idle_timeout_ms: None,
        }
    }
}

/// Options for capturing one target
///
/// Together with the target URL this forms one capture request. The URL pair
/// path of [`compare_targets`] applies the same options to both targets.
///
/// # Examples
///
/// ```
/// let opts = screenshot_compare::CaptureOptions::default();
/// assert_eq!(opts.viewport.width, 1280);
/// assert!(opts.full_page);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub viewport: Viewport,
    /// Capture the whole scrollable document instead of the viewport
    pub full_page: bool,
    /// Navigation timeout in milliseconds (also bounds the network-idle
    /// wait); `0` disables the bound
    pub timeout_ms: u64,
    /// Fixed delay after load so client-side rendering can finish
    pub wait_after_load_ms: u64,
    /// Upper bound for the `document.readyState` poll after the settle delay
    pub ready_timeout_ms: u64,
    /// Quiet window that counts as network idle
    pub network_idle_ms: u64,
    /// Cookies as `name=value;name2=value2`, scoped to the target host
    pub cookies: Option<String>,
    pub browser: BrowserOptions,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            full_page: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            wait_after_load_ms: DEFAULT_WAIT_AFTER_LOAD_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            network_idle_ms: DEFAULT_NETWORK_IDLE_MS,
            cookies: None,
            browser: BrowserOptions::default(),
        }
    }
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::InvalidInputError(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        Ok(())
    }

    /// Navigation bound, `None` when `timeout_ms` is 0
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Options for comparing two rasters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Color distance tolerance and tolerated fraction of differing pixels,
    /// between 0 (exact) and 1 (anything goes)
    pub threshold: f64,
    /// Count pixels that only differ by anti-aliasing
    pub include_aa: bool,
    /// Opacity of unchanged pixels in the diff image
    pub alpha: f64,
    /// Marker color for anti-aliased pixels
    pub aa_color: [u8; 3],
    /// Highlight color for differing pixels
    pub diff_color: [u8; 3],
    /// Highlight color for pixels that got darker, when distinct from `diff_color`
    pub diff_color_alt: Option<[u8; 3]>,
    /// Draw differences only, on a transparent background
    pub diff_mask: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            include_aa: false,
            alpha: 0.1,
            aa_color: [255, 255, 0],
            diff_color: [255, 0, 0],
            diff_color_alt: None,
            diff_mask: false,
        }
    }
}

impl CompareOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidInputError(format!(
                "threshold must be between 0 and 1, got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::InvalidInputError(format!(
                "alpha must be between 0 and 1, got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Parameters for setting a cookie before navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
}

/// Parse a `name=value;name2=value2` cookie string into cookies scoped to
/// the host of `url` with path `/`.
///
/// Empty segments are skipped; a value may itself contain `=`.
///
/// ```
/// let cookies = screenshot_compare::parse_cookie_string("a=1; b=2", "https://example.com/x").unwrap();
/// assert_eq!(cookies.len(), 2);
/// assert_eq!(cookies[1].domain.as_deref(), Some("example.com"));
/// ```
pub fn parse_cookie_string(cookies: &str, url: &str) -> Result<Vec<CookieParam>> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::InvalidInputError(format!("invalid URL '{}': {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidInputError(format!("URL '{}' has no host to scope cookies to", url)))?
        .to_string();

    cookies
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidInputError(format!("cookie '{}' is not name=value", pair)))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::InvalidInputError(format!("cookie '{}' has an empty name", pair)));
            }
            Ok(CookieParam {
                name: name.to_string(),
                value: value.trim().to_string(),
                url: None,
                domain: Some(host.clone()),
                path: Some("/".to_string()),
            })
        })
        .collect()
}

/// `document.readyState` of the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl std::str::FromStr for ReadyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_matches('"') {
            "loading" => Ok(ReadyState::Loading),
            "interactive" => Ok(ReadyState::Interactive),
            "complete" => Ok(ReadyState::Complete),
            other => Err(Error::RenderError(format!("unknown document.readyState '{}'", other))),
        }
    }
}

/// Capability set of one browsing context.
///
/// The capture pipeline only talks to pages through this trait, so any
/// rendering engine (or a deterministic fake) is substitutable.
pub trait Renderer {
    /// Add cookies to the context; must happen before `navigate`
    fn inject_cookies(&mut self, cookies: &[CookieParam]) -> Result<()>;

    /// Navigate and wait for the load event, bounded by `timeout` when set
    fn navigate(&mut self, url: &str, timeout: Option<Duration>) -> Result<()>;

    /// Number of network resources the page has requested so far. Used to
    /// detect network idle: the count stops changing.
    fn resource_count(&mut self) -> Result<u64>;

    /// Current `document.readyState`
    fn ready_state(&mut self) -> Result<ReadyState>;

    /// Wait until the page is ready for a screenshot
    fn wait_until_ready(&mut self, policy: &ReadinessPolicy) -> Result<()> {
        policy.run(self)
    }

    /// Encoded PNG of the viewport, or of the whole document when `full_page`
    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>>;

    /// Close the context and release the browser process
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Acquires a fresh browser process with one context per call.
pub trait Launcher {
    type Page: Renderer;

    fn launch(&self, viewport: Viewport, browser: &BrowserOptions) -> Result<Self::Page>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let capture = CaptureOptions::default();
        assert_eq!(capture.viewport, Viewport { width: 1280, height: 800 });
        assert_eq!(capture.timeout_ms, 60_000);
        assert_eq!(capture.wait_after_load_ms, 2_000);
        assert_eq!(capture.ready_timeout_ms, 10_000);
        assert!(capture.full_page);
        assert!(capture.browser.headless);

        let compare = CompareOptions::default();
        assert_eq!(compare.threshold, 0.1);
        assert!(!compare.include_aa);
        assert_eq!(compare.diff_color, [255, 0, 0]);
    }

    #[test]
    fn test_validate_rejects_empty_viewport_and_bad_threshold() {
        let capture = CaptureOptions {
            viewport: Viewport { width: 0, height: 800 },
            ..Default::default()
        };
        assert!(matches!(capture.validate(), Err(Error::InvalidInputError(_))));

        let compare = CompareOptions {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(compare.validate(), Err(Error::InvalidInputError(_))));
        assert!(CompareOptions { threshold: 0.0, ..Default::default() }.validate().is_ok());
        assert!(CompareOptions { threshold: 1.0, ..Default::default() }.validate().is_ok());
    }

    #[test]
    fn test_parse_cookie_string() {
        let cookies = parse_cookie_string("session=abc; theme=dark;;token=a=b", "http://localhost:8080/page").unwrap();
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value, "abc");
        assert_eq!(cookies[0].domain.as_deref(), Some("localhost"));
        assert_eq!(cookies[0].path.as_deref(), Some("/"));
        assert_eq!(cookies[2].value, "a=b");
    }

    #[test]
    fn test_parse_cookie_string_errors() {
        assert!(matches!(
            parse_cookie_string("novalue", "https://example.com"),
            Err(Error::InvalidInputError(_))
        ));
        assert!(matches!(
            parse_cookie_string("a=1", "not a url"),
            Err(Error::InvalidInputError(_))
        ));
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let opts = CaptureOptions { timeout_ms: 0, ..Default::default() };
        assert!(opts.validate().is_ok());
        assert_eq!(opts.timeout(), None);
        assert_eq!(CaptureOptions::default().timeout(), Some(Duration::from_millis(60_000)));
    }

    #[test]
    fn test_ready_state_parse() {
        assert_eq!("complete".parse::<ReadyState>().unwrap(), ReadyState::Complete);
        assert_eq!("\"loading\"".parse::<ReadyState>().unwrap(), ReadyState::Loading);
        assert!("weird".parse::<ReadyState>().is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: CaptureOptions = serde_json::from_str(r#"{"full_page": false, "viewport": {"width": 640, "height": 480}}"#).unwrap();
        assert!(!opts.full_page);
        assert_eq!(opts.viewport.width, 640);
        assert_eq!(opts.timeout_ms, DEFAULT_TIMEOUT_MS);
    }
}
