//! Deterministic in-process browser used by the integration tests.
#![allow(dead_code)]

use screenshot_compare::{
    BrowserOptions, CookieParam, Error, Launcher, RasterImage, ReadyState, Renderer, Result, Viewport,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Launch {
        viewport: Viewport,
        executable: Option<PathBuf>,
    },
    Cookies(Vec<CookieParam>),
    Navigate(String),
    Screenshot { full_page: bool },
    Close,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    pages: HashMap<String, RasterImage>,
    /// Launch attempts that fail as if no engine were installed
    missing_engine_launches: usize,
    /// Navigations to these URLs time out unless the navigation is unbounded
    slow_urls: Vec<String>,
    open_pages: usize,
}

/// Serves configured rasters for URLs and records every call.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<State>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, image: RasterImage) -> Self {
        self.state.lock().unwrap().pages.insert(url.to_string(), image);
        self
    }

    pub fn with_slow_url(self, url: &str) -> Self {
        self.state.lock().unwrap().slow_urls.push(url.to_string());
        self
    }

    pub fn with_missing_engine(self, launches: usize) -> Self {
        self.state.lock().unwrap().missing_engine_launches = launches;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn open_pages(&self) -> usize {
        self.state.lock().unwrap().open_pages
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl Launcher for FakeBrowser {
    type Page = FakePage;

    fn launch(&self, viewport: Viewport, browser: &BrowserOptions) -> Result<FakePage> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Launch {
            viewport,
            executable: browser.executable.clone(),
        });
        if state.missing_engine_launches > 0 {
            state.missing_engine_launches -= 1;
            return Err(Error::EngineUnavailableError("no browser installed".into()));
        }
        state.open_pages += 1;
        Ok(FakePage {
            state: Arc::clone(&self.state),
            url: None,
        })
    }
}

pub struct FakePage {
    state: Arc<Mutex<State>>,
    url: Option<String>,
}

impl Renderer for FakePage {
    fn inject_cookies(&mut self, cookies: &[CookieParam]) -> Result<()> {
        self.state.lock().unwrap().events.push(Event::Cookies(cookies.to_vec()));
        Ok(())
    }

    fn navigate(&mut self, url: &str, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Navigate(url.to_string()));
        if let Some(timeout) = timeout.filter(|_| state.slow_urls.iter().any(|u| u == url)) {
            return Err(Error::CaptureTimeoutError(timeout.as_millis() as u64));
        }
        if !state.pages.contains_key(url) {
            return Err(Error::LoadError(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    fn resource_count(&mut self) -> Result<u64> {
        Ok(3)
    }

    fn ready_state(&mut self) -> Result<ReadyState> {
        Ok(ReadyState::Complete)
    }

    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Screenshot { full_page });
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| Error::RenderError("screenshot before navigation".into()))?;
        state.pages[url].encode_png()
    }

    fn close(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Close);
        state.open_pages -= 1;
        Ok(())
    }
}

/// Opaque image of one color
pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RasterImage {
    RasterImage::filled(width, height, [rgb[0], rgb[1], rgb[2], 255])
}
