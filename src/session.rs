//! Long-lived browser session for interactive hosts.
//!
//! [`Capturer`](crate::Capturer) launches and tears down a browser per
//! capture. A host that captures repeatedly (an interactive UI, a watch mode)
//! can instead start one `BrowserSession`, pass it to whoever needs it, and
//! close it when done. The session owns its browser on a dedicated worker
//! thread, so the page type does not need to be `Send`.

use crate::capture::{render_page, PageGuard};
use crate::raster::persist;
use crate::{BrowserOptions, CaptureOptions, Error, Launcher, ReadinessPolicy, Renderer, Result, Viewport};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Capture {
        url: String,
        output: PathBuf,
        options: CaptureOptions,
        resp: oneshot::Sender<Result<PathBuf>>,
    },
    Close(oneshot::Sender<Result<()>>),
}

/// A browser kept alive across captures until [`BrowserSession::close`]
/// is called or every handle is dropped.
#[derive(Clone)]
pub struct BrowserSession {
    cmd_tx: Sender<Command>,
    viewport: Viewport,
}

impl BrowserSession {
    /// Launch the browser on a worker thread and wait until it is ready.
    pub async fn start<L>(launcher: L, viewport: Viewport, browser: BrowserOptions) -> Result<Self>
    where
        L: Launcher + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let page = match launcher.launch(viewport, &browser) {
                Ok(page) => page,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let mut guard = PageGuard::new(page);
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Capture { url, output, options, resp } => {
                        let res = capture_on(&mut *guard, viewport, &url, &output, &options);
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(guard.release());
                        return;
                    }
                }
            }
            // Every handle was dropped without close; the guard releases the page
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Session init canceled: {}", e)))??;

        Ok(Self { cmd_tx, viewport })
    }

    /// Viewport fixed when the session was started
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Capture `url` to `output` reusing the session's browser.
    ///
    /// `options.viewport` must match the session viewport; browser launch
    /// options are ignored since the browser is already running.
    pub async fn capture(&self, url: &str, output: &Path, options: &CaptureOptions) -> Result<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Capture {
                url: url.to_string(),
                output: output.to_path_buf(),
                options: options.clone(),
                resp: tx,
            })
            .map_err(|_| Error::Other("Browser session is closed".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Capture canceled: {}", e)))?
    }

    /// Shut down the worker and close the browser.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(tx))
            .map_err(|_| Error::Other("Browser session is closed".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}

fn capture_on<R: Renderer>(
    page: &mut R,
    viewport: Viewport,
    url: &str,
    output: &Path,
    options: &CaptureOptions,
) -> Result<PathBuf> {
    options.validate()?;
    if options.viewport != viewport {
        return Err(Error::InvalidInputError(format!(
            "session viewport is {}x{}, capture asked for {}x{}",
            viewport.width, viewport.height, options.viewport.width, options.viewport.height
        )));
    }
    let png = render_page(page, url, options, &ReadinessPolicy::for_capture(options))?;
    persist(output, &png)?;
    info!("Captured {} -> {} (session)", url, output.display());
    Ok(output.to_path_buf())
}
