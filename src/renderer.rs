//! Shared rendering-engine handle
//!
//! The rendering engine (a headless Chrome instance in production) is the
//! most expensive resource in the process. One instance is launched lazily on
//! first demand, shared by every batch, and replaced automatically when it
//! disconnects. Launches are single-flight: callers arriving while a launch is
//! in progress await that same launch instead of starting another one.

use crate::ScrapeError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Starts new rendering-engine instances.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Renderer>, ScrapeError>;
}

/// A running rendering-engine instance.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a fresh, blank page.
    async fn new_page(&self) -> Result<Box<dyn RenderedPage>, ScrapeError>;

    /// False once the engine has signalled disconnection.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), ScrapeError>;
}

/// A single navigable page opened against a [`Renderer`].
#[async_trait]
pub trait RenderedPage: Send + Sync {
    /// Load `url` and wait for network activity to settle, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError>;

    /// Serialized markup of the rendered document.
    async fn content(&self) -> Result<String, ScrapeError>;

    /// Evaluate `script` in the page and return its string result.
    async fn evaluate_string(&self, script: &str) -> Result<String, ScrapeError>;

    /// PNG capture of the whole page, not just the viewport.
    async fn screenshot_full_page(&self) -> Result<Vec<u8>, ScrapeError>;

    async fn close(self: Box<Self>) -> Result<(), ScrapeError>;
}

type LaunchFuture = Shared<BoxFuture<'static, Result<Arc<dyn Renderer>, ScrapeError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererStatus {
    pub running: bool,
    pub launching: bool,
    pub launches: usize,
}

/// Process-wide owner of the shared renderer.
pub struct RendererHandle {
    launcher: Arc<dyn Launcher>,
    current: Mutex<Option<LaunchFuture>>,
    launches: Arc<AtomicUsize>,
}

impl RendererHandle {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            current: Mutex::new(None),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return the running renderer, launching one if none is usable.
    pub async fn acquire(&self) -> Result<Arc<dyn Renderer>, ScrapeError> {
        let launch = {
            let mut current = self
                .current
                .lock()
                .map_err(|_| ScrapeError::Internal("renderer state poisoned".into()))?;

            let reusable = match current.as_ref().map(|launch| launch.peek()) {
                // launch still in flight: join it
                Some(None) => true,
                Some(Some(Ok(renderer))) if renderer.is_connected() => true,
                Some(Some(Ok(_))) => {
                    warn!("Browser disconnected, a new instance will be launched");
                    false
                }
                Some(Some(Err(_))) | None => false,
            };

            match current.as_ref() {
                Some(launch) if reusable => launch.clone(),
                _ => {
                    let launch = self.start_launch();
                    *current = Some(launch.clone());
                    launch
                }
            }
        };

        launch.await
    }

    fn start_launch(&self) -> LaunchFuture {
        let launcher = self.launcher.clone();
        let launches = self.launches.clone();

        async move {
            let attempt = launches.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Launching browser (launch #{})", attempt);
            crate::metrics::record_renderer_launch();
            let renderer = launcher.launch().await;
            match &renderer {
                Ok(_) => info!("Browser launch #{} ready", attempt),
                Err(e) => warn!("Browser launch #{} failed: {}", attempt, e),
            }
            renderer
        }
        .boxed()
        .shared()
    }

    /// Close the running instance, if any, and clear state.
    pub async fn release(&self) {
        let launch = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };

        if let Some(launch) = launch {
            if let Ok(renderer) = launch.await {
                if let Err(e) = renderer.close().await {
                    warn!("Error closing browser: {}", e);
                }
                info!("Browser closed");
            }
        }
    }

    pub fn status(&self) -> RendererStatus {
        let (running, launching) = match self.current.lock() {
            Ok(current) => match current.as_ref().map(|launch| launch.peek()) {
                Some(Some(Ok(renderer))) => (renderer.is_connected(), false),
                Some(None) => (false, true),
                _ => (false, false),
            },
            Err(_) => (false, false),
        };

        RendererStatus {
            running,
            launching,
            launches: self.launch_count(),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct StubRenderer {
        connected: AtomicBool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn new_page(&self) -> Result<Box<dyn RenderedPage>, ScrapeError> {
            Err(ScrapeError::RendererFault("stub has no pages".into()))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<(), ScrapeError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubLauncher {
        launched: Mutex<Vec<Arc<StubRenderer>>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl Launcher for StubLauncher {
        async fn launch(&self) -> Result<Arc<dyn Renderer>, ScrapeError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ScrapeError::RendererLaunch("chrome not found".into()));
            }
            let renderer = Arc::new(StubRenderer {
                connected: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            });
            self.launched.lock().unwrap().push(renderer.clone());
            Ok(renderer)
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquire_launches_once() {
        let launcher = Arc::new(StubLauncher::default());
        let handle = Arc::new(RendererHandle::new(launcher.clone()));

        let acquisitions = (0..8).map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.acquire().await.map(|_| ()) })
        });
        for joined in futures::future::join_all(acquisitions).await {
            joined.unwrap().unwrap();
        }

        assert_eq!(handle.launch_count(), 1);
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
        assert!(handle.status().running);
    }

    #[tokio::test]
    async fn test_disconnected_renderer_is_replaced() {
        let launcher = Arc::new(StubLauncher::default());
        let handle = RendererHandle::new(launcher.clone());

        handle.acquire().await.unwrap();
        launcher.launched.lock().unwrap()[0]
            .connected
            .store(false, Ordering::SeqCst);
        assert!(!handle.status().running);

        handle.acquire().await.unwrap();
        assert_eq!(handle.launch_count(), 2);
        assert!(handle.status().running);
    }

    #[tokio::test]
    async fn test_failed_launch_is_retried_on_next_acquire() {
        let launcher = Arc::new(StubLauncher::default());
        launcher.fail_next.store(true, Ordering::SeqCst);
        let handle = RendererHandle::new(launcher.clone());

        let err = handle.acquire().await.err().unwrap();
        assert!(matches!(err, ScrapeError::RendererLaunch(_)));

        handle.acquire().await.unwrap();
        assert_eq!(handle.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_release_closes_and_clears() {
        let launcher = Arc::new(StubLauncher::default());
        let handle = RendererHandle::new(launcher.clone());

        handle.acquire().await.unwrap();
        handle.release().await;

        assert!(launcher.launched.lock().unwrap()[0]
            .closed
            .load(Ordering::SeqCst));
        assert_eq!(
            handle.status(),
            RendererStatus {
                running: false,
                launching: false,
                launches: 1
            }
        );

        // releasing with nothing running is a no-op
        handle.release().await;
    }
}
