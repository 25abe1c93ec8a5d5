//! Batch coordinator
//!
//! [`ScrapeService`] owns the shared renderer handle and turns a validated
//! [`BatchRequest`] into a [`BatchResult`] whose results are in input order.
//!
//! # Examples
//!
//! ```rust,no_run
//! use page_scraper::{BatchRequest, Config, ContentFormat, ScrapeService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ScrapeService::with_chrome(Config::default());
//!
//!     let request = BatchRequest::new(vec!["https://example.com/".into()], ContentFormat::Text);
//!     let batch = service.run_batch(request).await?;
//!     println!("{}", serde_json::to_string_pretty(&batch)?);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::chrome::ChromeLauncher;
use crate::extractor::ContentExtractor;
use crate::renderer::{Launcher, RendererHandle};
use crate::utils::seconds_3dp;
use crate::worker::{effective_workers, ResultSink, TaskPipeline, TaskQueue, TaskSettings, WorkerPool};
use crate::{BatchMeta, BatchRequest, BatchResult, Config, RenderTask, ScrapeError, TaskResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct ScrapeService {
    config: Config,
    renderer: Arc<RendererHandle>,
    extractor: ContentExtractor,
}

impl ScrapeService {
    pub fn new(config: Config, launcher: Arc<dyn Launcher>, extractor: ContentExtractor) -> Self {
        Self {
            config,
            renderer: Arc::new(RendererHandle::new(launcher)),
            extractor,
        }
    }

    /// Service backed by a local Chrome, with markdown conversion when it is
    /// both compiled in and allowed by `config`.
    pub fn with_chrome(config: Config) -> Self {
        let launcher = Arc::new(ChromeLauncher::new(config.clone()));
        let extractor = if config.allow_markdown {
            ContentExtractor::with_default_markdown()
        } else {
            ContentExtractor::text_only()
        };
        Self::new(config, launcher, extractor)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<RendererHandle> {
        &self.renderer
    }

    pub fn markdown_available(&self) -> bool {
        self.extractor.markdown_available()
    }

    /// Process every URL occurrence of `request` and return one result per
    /// occurrence, in input order.
    ///
    /// Only batch-level problems (empty input, renderer launch failure) are
    /// returned as errors; per-URL failures are recorded in the results.
    ///
    /// With [`crate::ScreenshotMode::Stored`] the captured bytes stay in the results
    /// as [`crate::Screenshot::Pending`]; pass the batch through
    /// [`crate::storage::store_pending`] to upload them. Results that skip
    /// that step serialize with `screenshotStored: false`.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult, ScrapeError> {
        if request.urls.is_empty() {
            return Err(ScrapeError::validation("urls must be non-empty array"));
        }

        let started = Instant::now();
        self.renderer.acquire().await?;

        let tasks: Vec<RenderTask> = request.tasks().collect();
        let workers = effective_workers(
            request.concurrency.max(1),
            self.config.max_concurrency,
            tasks.len(),
        );
        info!(
            urls = tasks.len(),
            workers,
            format = %request.format,
            "Starting scrape batch"
        );

        let pipeline = Arc::new(TaskPipeline::new(
            self.renderer.clone(),
            self.extractor.clone(),
            TaskSettings {
                format: request.format,
                screenshot: request.screenshot,
                navigation_timeout: self.config.navigation_timeout(),
            },
        ));
        let sink = ResultSink::new();
        WorkerPool::spawn(workers, pipeline, TaskQueue::new(tasks.iter().cloned()), sink.clone())
            .join()
            .await;

        let results = reorder(&tasks, sink.take().await);
        let elapsed = started.elapsed();
        crate::metrics::record_batch(elapsed);

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            count = results.len(),
            failed,
            duration_ms = elapsed.as_millis() as u64,
            "Scrape batch completed"
        );

        Ok(BatchResult {
            meta: BatchMeta {
                count: results.len(),
                duration_ms: elapsed.as_millis() as u64,
                duration_seconds: seconds_3dp(elapsed),
            },
            results,
        })
    }

    /// Close the shared renderer. Called once at process shutdown.
    pub async fn shutdown(&self) {
        info!("Shutting down scrape service...");
        self.renderer.release().await;
        info!("Scrape service shutdown complete");
    }
}

/// Place each result at its task's position. A task without a result (its
/// worker died) gets an error result so the output always matches the input.
pub fn reorder(tasks: &[RenderTask], completed: Vec<TaskResult>) -> Vec<TaskResult> {
    let mut slots: Vec<Option<TaskResult>> = (0..tasks.len()).map(|_| None).collect();

    for result in completed {
        match slots.get_mut(result.position) {
            Some(slot) if slot.is_none() => *slot = Some(result),
            _ => warn!("Discarding unexpected result for {}", result.url),
        }
    }

    tasks
        .iter()
        .zip(slots)
        .map(|(task, slot)| {
            slot.unwrap_or_else(|| TaskResult::failure(task, 0.0, "Task did not complete"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentFormat;

    fn task(position: usize, url: &str) -> RenderTask {
        RenderTask {
            position,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_reorder_restores_input_order() {
        let tasks = vec![task(0, "https://a.test/"), task(1, "https://b.test/"), task(2, "https://a.test/")];
        let completed = vec![
            TaskResult::success(&tasks[2], 0.1, "third".into(), ContentFormat::Html, None),
            TaskResult::failure(&tasks[1], 0.2, "boom"),
            TaskResult::success(&tasks[0], 0.3, "first".into(), ContentFormat::Html, None),
        ];

        let ordered = reorder(&tasks, completed);
        assert_eq!(ordered[0].content(), Some("first"));
        assert_eq!(ordered[1].error(), Some("boom"));
        assert_eq!(ordered[2].content(), Some("third"));
    }

    #[test]
    fn test_reorder_fills_missing_results() {
        let tasks = vec![task(0, "https://a.test/"), task(1, "https://b.test/")];
        let completed = vec![TaskResult::success(&tasks[0], 0.1, "a".into(), ContentFormat::Html, None)];

        let ordered = reorder(&tasks, completed);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[1].url, "https://b.test/");
        assert_eq!(ordered[1].error(), Some("Task did not complete"));
    }
}
