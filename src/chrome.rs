//! Headless Chrome implementation of the renderer capabilities
//!
//! Wraps chromiumoxide: one `Browser` per [`ChromeRenderer`], with the CDP
//! handler stream polled on a background task. The handler task finishing is
//! how a disconnected browser is detected.

use crate::renderer::{Launcher, RenderedPage, Renderer};
use crate::{create_browser_config, Config, ScrapeError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// The page counts as settled once no more than this many requests are in
/// flight for [`NETWORK_QUIET_PERIOD`].
const MAX_INFLIGHT_WHEN_IDLE: usize = 2;
const NETWORK_QUIET_PERIOD: Duration = Duration::from_millis(500);

pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Renderer>, ScrapeError> {
        let browser_config = create_browser_config(&self.config)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::RendererLaunch(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser
        // to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            warn!("Browser disconnected");
        });

        info!(
            headless = self.config.headless,
            "Chrome launched with viewport {}x{}",
            self.config.viewport.width,
            self.config.viewport.height
        );

        Ok(Arc::new(ChromeRenderer {
            browser: RwLock::new(browser),
            handler: handler_task,
        }))
    }
}

pub struct ChromeRenderer {
    /// Shared for page creation; exclusive only for shutdown.
    browser: RwLock<Browser>,
    handler: JoinHandle<()>,
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn new_page(&self) -> Result<Box<dyn RenderedPage>, ScrapeError> {
        let page = self.browser.read().await.new_page("about:blank").await?;
        Ok(Box::new(ChromePage { page }))
    }

    fn is_connected(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let mut browser = self.browser.write().await;
        let closed = browser.close().await.map(|_| ());
        if closed.is_ok() {
            let _ = browser.wait().await;
        }
        self.handler.abort();
        closed.map_err(ScrapeError::from)
    }
}

pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    /// Wait until the number of in-flight requests stays at or below
    /// [`MAX_INFLIGHT_WHEN_IDLE`] for [`NETWORK_QUIET_PERIOD`], or `deadline`
    /// passes.
    async fn wait_for_network_idle(
        &self,
        url: &str,
        deadline: Instant,
        budget: Duration,
        mut started: chromiumoxide::listeners::EventStream<EventRequestWillBeSent>,
        mut finished: chromiumoxide::listeners::EventStream<EventLoadingFinished>,
        mut failed: chromiumoxide::listeners::EventStream<EventLoadingFailed>,
    ) -> Result<(), ScrapeError> {
        let mut inflight: HashSet<String> = HashSet::new();
        let mut quiet_since = Some(Instant::now());

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ScrapeError::NavigationTimeout {
                    url: url.to_string(),
                    timeout: budget,
                });
            }

            if let Some(since) = quiet_since {
                if now.duration_since(since) >= NETWORK_QUIET_PERIOD {
                    return Ok(());
                }
            }

            let wake_at = match quiet_since {
                Some(since) => (since + NETWORK_QUIET_PERIOD).min(deadline),
                None => deadline,
            };

            tokio::select! {
                Some(event) = started.next() => {
                    inflight.insert(event.request_id.inner().clone());
                }
                Some(event) = finished.next() => {
                    inflight.remove(event.request_id.inner());
                }
                Some(event) = failed.next() => {
                    inflight.remove(event.request_id.inner());
                }
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            quiet_since = match (inflight.len() <= MAX_INFLIGHT_WHEN_IDLE, quiet_since) {
                (true, Some(since)) => Some(since),
                (true, None) => Some(Instant::now()),
                (false, _) => None,
            };
        }
    }
}

#[async_trait]
impl RenderedPage for ChromePage {
    async fn navigate(&self, url: &str, budget: Duration) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + budget;

        let started = self.page.event_listener::<EventRequestWillBeSent>().await?;
        let finished = self.page.event_listener::<EventLoadingFinished>().await?;
        let failed = self.page.event_listener::<EventLoadingFailed>().await?;

        match timeout(budget, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScrapeError::navigation(url, e)),
            Err(_) => {
                return Err(ScrapeError::NavigationTimeout {
                    url: url.to_string(),
                    timeout: budget,
                })
            }
        }

        self.wait_for_network_idle(url, deadline, budget, started, finished, failed)
            .await
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.page
            .content()
            .await
            .map_err(|e| ScrapeError::Extraction(e.to_string()))
    }

    async fn evaluate_string(&self, script: &str) -> Result<String, ScrapeError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Extraction(e.to_string()))?;
        result
            .into_value::<String>()
            .map_err(|e| ScrapeError::Extraction(e.to_string()))
    }

    async fn screenshot_full_page(&self) -> Result<Vec<u8>, ScrapeError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();

        self.page
            .screenshot(params)
            .await
            .map_err(|e| ScrapeError::Screenshot(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), ScrapeError> {
        self.page.close().await.map_err(ScrapeError::from)
    }
}
