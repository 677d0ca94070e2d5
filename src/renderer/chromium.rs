//! Headless Chromium renderer built on `chromiumoxide`.

use super::{RenderSession, Renderer, SessionOptions};
use crate::error::RenderError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Owns the browser process and its CDP event loop.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch Chromium.
    ///
    /// `CHROMIUM_REMOTE_DEBUGGING_URL` connects to an already running browser
    /// instead of launching one.
    #[instrument(level = "info", skip_all, fields(headless = headless, timeout_ms = timeout_ms))]
    pub async fn launch(headless: bool, timeout_ms: u64) -> Result<Self, RenderError> {
        let (browser, mut handler) = match std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL") {
            Ok(remote) => {
                info!(%remote, "Connecting to remote Chromium");
                Browser::connect(remote)
                    .await
                    .map_err(|e| RenderError::Launch(e.to_string()))?
            }
            Err(_) => {
                let mut builder = BrowserConfig::builder()
                    .no_sandbox()
                    .request_timeout(Duration::from_millis(timeout_ms))
                    .arg("--disable-gpu")
                    .arg("--disable-dev-shm-usage")
                    .arg("--disable-extensions");
                if !headless {
                    builder = builder.with_head();
                }
                let config = builder.build().map_err(RenderError::Launch)?;
                Browser::launch(config)
                    .await
                    .map_err(|e| RenderError::Launch(e.to_string()))?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });

        info!("Chromium ready");
        Ok(Self { browser, handler })
    }

    /// Close the browser and stop the event loop.
    #[instrument(level = "info", skip_all)]
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        info!("Chromium shut down");
    }
}

impl Renderer for ChromiumRenderer {
    type Session = ChromiumSession;

    async fn new_session(&self, options: &SessionOptions) -> Result<ChromiumSession, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Launch(format!("failed to open page: {e}")))?;
        Ok(ChromiumSession {
            page,
            options: options.clone(),
        })
    }
}

/// One Chromium tab.
pub struct ChromiumSession {
    page: Page,
    options: SessionOptions,
}

impl ChromiumSession {
    /// Poll for the wait selector until it appears or the timeout elapses.
    async fn wait_for_selector(&self, selector: &str) {
        let deadline = Instant::now() + Duration::from_millis(self.options.timeout_ms);
        loop {
            if self.page.find_element(selector).await.is_ok() {
                debug!(selector, "Wait selector present");
                return;
            }
            if Instant::now() >= deadline {
                warn!(selector, "Timed out waiting for selector; continuing with current DOM");
                return;
            }
            sleep(WAIT_POLL).await;
        }
    }
}

impl RenderSession for ChromiumSession {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn open(&mut self, url: &str) -> Result<String, RenderError> {
        let t0 = Instant::now();
        let timeout_ms = self.options.timeout_ms;

        match timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout_ms,
                });
            }
        }

        if let Some(selector) = self.options.wait_selector.clone() {
            self.wait_for_selector(&selector).await;
        }

        let html = self.content().await?;
        info!(
            bytes = html.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Rendered page"
        );
        Ok(html)
    }

    async fn scroll(&mut self) -> Result<(), RenderError> {
        self.page
            .evaluate(SCROLL_TO_BOTTOM)
            .await
            .map_err(|e| RenderError::Script(format!("scroll failed: {e}")))?;
        Ok(())
    }

    async fn count_matches(&mut self, selector: &str) -> Result<usize, RenderError> {
        let quoted =
            serde_json::to_string(selector).map_err(|e| RenderError::Script(e.to_string()))?;
        let script = format!("document.querySelectorAll({quoted}).length");
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| RenderError::Script(format!("count failed: {e}")))?;
        result
            .into_value::<usize>()
            .map_err(|e| RenderError::Script(format!("count result: {e}")))
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.page
            .content()
            .await
            .map_err(|e| RenderError::Script(format!("failed to read DOM: {e}")))
    }

    async fn close(self) -> Result<(), RenderError> {
        self.page
            .close()
            .await
            .map_err(|e| RenderError::Script(format!("failed to close page: {e}")))
    }
}
