//! Bounded worker pool over a shared FIFO task queue
//!
//! Every worker repeatedly claims the next [`RenderTask`], runs it through
//! the [`TaskPipeline`] and appends the [`TaskResult`] to a shared
//! [`ResultSink`]. Task failures become error results; they never stop a
//! worker or the batch.

use crate::extractor::ContentExtractor;
use crate::renderer::RendererHandle;
use crate::session::PageSession;
use crate::utils::seconds_3dp;
use crate::{ContentFormat, RenderTask, ScrapeError, Screenshot, ScreenshotMode, TaskResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Number of workers to start: never more than requested, than the
/// operator ceiling, or than there are tasks.
pub fn effective_workers(requested: usize, max_concurrency: usize, task_count: usize) -> usize {
    requested.min(max_concurrency).min(task_count)
}

/// Pending tasks shared by all workers of one batch.
#[derive(Clone, Default)]
pub struct TaskQueue {
    pending: Arc<Mutex<VecDeque<RenderTask>>>,
}

impl TaskQueue {
    pub fn new(tasks: impl IntoIterator<Item = RenderTask>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(tasks.into_iter().collect())),
        }
    }

    /// Claim the oldest pending task.
    pub async fn pop(&self) -> Option<RenderTask> {
        self.pending.lock().await.pop_front()
    }
}

/// Results in completion order.
#[derive(Clone, Default)]
pub struct ResultSink {
    results: Arc<Mutex<Vec<TaskResult>>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, result: TaskResult) {
        self.results.lock().await.push(result);
    }

    pub async fn take(&self) -> Vec<TaskResult> {
        std::mem::take(&mut *self.results.lock().await)
    }
}

/// Per-batch settings applied to every task.
#[derive(Debug, Clone, Copy)]
pub struct TaskSettings {
    pub format: ContentFormat,
    pub screenshot: ScreenshotMode,
    pub navigation_timeout: Duration,
}

/// Render, extract and capture a single task.
pub struct TaskPipeline {
    renderer: Arc<RendererHandle>,
    extractor: ContentExtractor,
    settings: TaskSettings,
}

impl TaskPipeline {
    pub fn new(
        renderer: Arc<RendererHandle>,
        extractor: ContentExtractor,
        settings: TaskSettings,
    ) -> Self {
        Self {
            renderer,
            extractor,
            settings,
        }
    }

    /// Run one task to a result. Never fails: errors are recorded in the
    /// returned result.
    pub async fn process(&self, task: &RenderTask) -> TaskResult {
        let started = Instant::now();
        let outcome = self.render(task).await;
        let elapsed = started.elapsed();
        crate::metrics::record_task(outcome.is_ok(), elapsed);

        match outcome {
            Ok((content, format, screenshot)) => {
                TaskResult::success(task, seconds_3dp(elapsed), content, format, screenshot)
            }
            Err(e) => {
                // a relaunch failing mid-batch still only fails this task
                if e.is_task_level() {
                    warn!(url = %task.url, "Task failed: {}", e);
                } else {
                    error!(url = %task.url, severity = ?e.severity(), "Task failed: {}", e);
                }
                TaskResult::failure(task, seconds_3dp(elapsed), e)
            }
        }
    }

    async fn render(
        &self,
        task: &RenderTask,
    ) -> Result<(String, ContentFormat, Option<Screenshot>), ScrapeError> {
        let renderer = self.renderer.acquire().await?;
        let session = PageSession::open(renderer.as_ref(), &task.url).await?;
        let outcome = self.render_in(&session).await;
        session.close().await;
        outcome
    }

    async fn render_in(
        &self,
        session: &PageSession,
    ) -> Result<(String, ContentFormat, Option<Screenshot>), ScrapeError> {
        session.navigate(self.settings.navigation_timeout).await?;
        let (content, format) = self.extractor.extract(session, self.settings.format).await?;

        let screenshot = match self.settings.screenshot {
            ScreenshotMode::Off => None,
            ScreenshotMode::Inline => Some(Screenshot::Inline {
                screenshot_base64: STANDARD.encode(session.screenshot_full_page().await?),
            }),
            ScreenshotMode::Stored => Some(Screenshot::Pending(session.screenshot_full_page().await?)),
        };

        Ok((content, format, screenshot))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct Worker {
    id: usize,
    pipeline: Arc<TaskPipeline>,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl Worker {
    pub fn new(id: usize, pipeline: Arc<TaskPipeline>) -> Self {
        Self {
            id,
            pipeline,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Drain `queue` into `sink`, returning once no task is left.
    pub async fn run(self, queue: TaskQueue, sink: ResultSink) -> WorkerStats {
        debug!("Starting worker {}", self.id);

        while let Some(task) = queue.pop().await {
            let result = self.pipeline.process(&task).await;

            self.processed.fetch_add(1, Ordering::Relaxed);
            if !result.is_success() {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            sink.push(result).await;
        }

        let stats = self.stats();
        debug!(
            "Worker {} stopped after {} tasks ({} failed)",
            stats.id, stats.processed, stats.failed
        );
        stats
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Workers of one batch, running on the tokio runtime.
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    pub fn spawn(size: usize, pipeline: Arc<TaskPipeline>, queue: TaskQueue, sink: ResultSink) -> Self {
        let handles = (0..size)
            .map(|id| {
                let worker = Worker::new(id, pipeline.clone());
                tokio::spawn(worker.run(queue.clone(), sink.clone()))
            })
            .collect();

        Self { handles }
    }

    /// Wait for every worker to finish.
    pub async fn join(self) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(e) => error!("Worker task aborted: {}", e),
            }
        }

        let processed: usize = stats.iter().map(|s| s.processed).sum();
        let failed: usize = stats.iter().map(|s| s.failed).sum();
        info!(
            "Worker pool drained: {} processed, {} failed",
            processed, failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeLauncher, FakeSite};
    use std::collections::HashSet;

    fn tasks(urls: &[&str]) -> Vec<RenderTask> {
        urls.iter()
            .enumerate()
            .map(|(position, url)| RenderTask {
                position,
                url: url.to_string(),
            })
            .collect()
    }

    fn pipeline(launcher: Arc<FakeLauncher>, screenshot: ScreenshotMode) -> Arc<TaskPipeline> {
        Arc::new(TaskPipeline::new(
            Arc::new(RendererHandle::new(launcher)),
            ContentExtractor::text_only(),
            TaskSettings {
                format: ContentFormat::Html,
                screenshot,
                navigation_timeout: Duration::from_secs(1),
            },
        ))
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(effective_workers(1000, 5, 2), 2);
        assert_eq!(effective_workers(3, 5, 10), 3);
        assert_eq!(effective_workers(8, 5, 10), 5);
        assert_eq!(effective_workers(3, 5, 0), 0);
    }

    #[tokio::test]
    async fn test_queue_hands_out_each_task_once() {
        let urls: Vec<String> = (0..200).map(|i| format!("https://a.test/{i}")).collect();
        let queue = TaskQueue::new(urls.iter().enumerate().map(|(position, url)| RenderTask {
            position,
            url: url.clone(),
        }));

        let claimers = (0..8).map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = queue.pop().await {
                    claimed.push(task.position);
                    tokio::task::yield_now().await;
                }
                claimed
            })
        });

        let mut seen = HashSet::new();
        let mut total = 0;
        for claimed in futures::future::join_all(claimers).await {
            for position in claimed.unwrap() {
                total += 1;
                seen.insert(position);
            }
        }
        assert_eq!(total, 200);
        assert_eq!(seen.len(), 200);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_task_becomes_error_result() {
        let launcher = FakeLauncher::with_sites([("https://ok.test/", FakeSite::html("<p>ok</p>"))]);
        let pipeline = pipeline(launcher.clone(), ScreenshotMode::Off);

        let batch = tasks(&["https://ok.test/", "https://missing.test/"]);
        let ok = pipeline.process(&batch[0]).await;
        let failed = pipeline.process(&batch[1]).await;

        assert_eq!(ok.content(), Some("<p>ok</p>"));
        assert!(failed.error().unwrap().contains("ERR_NAME_NOT_RESOLVED"));
        assert!(failed.content().is_none());

        // both sessions were released
        let state = launcher.state();
        assert_eq!(state.pages_opened.load(Ordering::SeqCst), 2);
        assert_eq!(state.pages_closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_relaunch_fails_only_the_task() {
        let launcher = FakeLauncher::with_sites([("https://ok.test/", FakeSite::html("<p>ok</p>"))]);
        let pipeline = pipeline(launcher.clone(), ScreenshotMode::Off);
        let batch = tasks(&["https://ok.test/", "https://ok.test/"]);

        assert!(pipeline.process(&batch[0]).await.content().is_some());
        launcher.disconnect_current();
        launcher.fail_launches();

        let failed = pipeline.process(&batch[1]).await;
        assert_eq!(failed.position, 1);
        assert!(failed.error().unwrap().contains("Could not auto detect a chrome executable"));
        assert!(failed.content().is_none());
    }

    #[tokio::test]
    async fn test_inline_screenshot_is_base64() {
        let launcher = FakeLauncher::with_sites([("https://ok.test/", FakeSite::html("<p>ok</p>"))]);
        let pipeline = pipeline(launcher, ScreenshotMode::Inline);

        let result = pipeline.process(&tasks(&["https://ok.test/"])[0]).await;
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["screenshotBase64"], STANDARD.encode(crate::tests::FAKE_PNG));
    }

    #[tokio::test]
    async fn test_screenshot_failure_fails_only_that_task() {
        let launcher = FakeLauncher::with_sites([
            ("https://ok.test/", FakeSite::html("<p>ok</p>")),
            ("https://noshot.test/", FakeSite::html("<p>x</p>").without_screenshot()),
        ]);
        let pipeline = pipeline(launcher.clone(), ScreenshotMode::Stored);
        let queue = TaskQueue::new(tasks(&["https://noshot.test/", "https://ok.test/"]));
        let sink = ResultSink::new();

        let stats = WorkerPool::spawn(1, pipeline, queue, sink.clone()).join().await;
        assert_eq!(
            stats,
            vec![WorkerStats {
                id: 0,
                processed: 2,
                failed: 1
            }]
        );

        let results = sink.take().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].error().is_some());
        assert!(results[1].is_success());
        assert_eq!(launcher.state().pages_closed.load(Ordering::SeqCst), 2);
    }
}
