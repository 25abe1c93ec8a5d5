//! Page sessions
//!
//! A [`PageSession`] owns one rendered page for the duration of a single task.
//! Prefer [`PageSession::close`]; if a session is dropped on an error path the
//! page is closed on a background task instead.

use crate::renderer::{RenderedPage, Renderer};
use crate::ScrapeError;
use std::time::Duration;
use tracing::{debug, warn};

pub struct PageSession {
    page: Option<Box<dyn RenderedPage>>,
    url: String,
}

impl PageSession {
    /// Open a blank page for `url` on `renderer`.
    pub async fn open(renderer: &dyn Renderer, url: &str) -> Result<Self, ScrapeError> {
        let page = renderer.new_page().await?;
        Ok(Self {
            page: Some(page),
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn page(&self) -> Result<&dyn RenderedPage, ScrapeError> {
        self.page
            .as_deref()
            .ok_or_else(|| ScrapeError::RendererFault(format!("page for {} already closed", self.url)))
    }

    pub async fn navigate(&self, timeout: Duration) -> Result<(), ScrapeError> {
        self.page()?.navigate(&self.url, timeout).await
    }

    pub async fn content(&self) -> Result<String, ScrapeError> {
        self.page()?.content().await
    }

    pub async fn evaluate_string(&self, script: &str) -> Result<String, ScrapeError> {
        self.page()?.evaluate_string(script).await
    }

    pub async fn screenshot_full_page(&self) -> Result<Vec<u8>, ScrapeError> {
        self.page()?.screenshot_full_page().await
    }

    /// Close the page. Failures are logged, never returned: a page that will
    /// not close must not turn a finished task into a failed one.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            match page.close().await {
                Ok(()) => debug!("Page closed for {}", self.url),
                Err(e) => warn!("Failed to close page for {}: {}", self.url, e),
            }
        }
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let url = std::mem::take(&mut self.url);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("Page cleanup failed for {}: {}", url, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to close page for {}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeRenderer, FakeSite};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_explicit_close_closes_once() {
        let renderer = FakeRenderer::with_sites([("https://a.test/", FakeSite::html("<p>a</p>"))]);

        let session = PageSession::open(&renderer, "https://a.test/").await.unwrap();
        session.navigate(Duration::from_secs(1)).await.unwrap();
        session.close().await;

        let state = renderer.state();
        assert_eq!(state.pages_opened.load(Ordering::SeqCst), 1);
        assert_eq!(state.pages_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_still_closes_page() {
        let renderer = FakeRenderer::with_sites([]);

        {
            let session = PageSession::open(&renderer, "https://gone.test/").await.unwrap();
            assert!(session.navigate(Duration::from_secs(1)).await.is_err());
        }

        // let the spawned cleanup run
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(renderer.state().pages_closed.load(Ordering::SeqCst), 1);
    }
}
