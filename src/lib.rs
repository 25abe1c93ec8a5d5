//! # Page Scraper
//!
//! Renders batches of URLs in a shared headless Chrome and returns their
//! content as HTML, plain text or Markdown, optionally with a full-page
//! screenshot. Every input URL occurrence gets exactly one result, in input
//! order, and a failing URL never fails the rest of its batch.
//!
//! ## Pipeline
//!
//! - **Renderer**: one browser process per service, launched lazily and
//!   single-flight; relaunched when it disconnects.
//! - **Page sessions**: one isolated page per task, always closed.
//! - **Workers**: a bounded pool draining a FIFO queue; the pool size is
//!   `min(requested, max_concurrency, urls)`.
//! - **Extraction**: `html` is the rendered DOM, `text` the normalised
//!   `innerText`, and `markdown` falls back to `text` when no converter is
//!   available.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_scraper::{BatchRequest, Config, ContentFormat, ScrapeService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ScrapeService::with_chrome(Config::default());
//!
//!     let request = BatchRequest {
//!         concurrency: 2,
//!         ..BatchRequest::new(
//!             vec!["https://example.com/".into(), "https://example.org/".into()],
//!             ContentFormat::Markdown,
//!         )
//!     };
//!     let batch = service.run_batch(request).await?;
//!     for result in &batch.results {
//!         println!("{} -> {:?}", result.url, result.content_format());
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # HTTP service on :3000
//! page-scraper serve
//!
//! # One-off batch printed as JSON
//! page-scraper scrape https://example.com --format text --pretty
//! page-scraper scrape --input urls.txt --concurrency 4 --screenshot store
//! ```

/// Configuration and settings for the scraper
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Batch request and result types
pub mod types;

/// Renderer capabilities and the shared single-flight handle
pub mod renderer;

/// Chrome-backed renderer
pub mod chrome;

/// Per-task page lifecycle
pub mod session;

/// HTML, text and Markdown extraction
pub mod extractor;

/// Bounded worker pool over the task queue
pub mod worker;

/// Batch coordinator
pub mod scrape_service;

/// Screenshot storage backends
pub mod storage;

/// HTTP middleware
pub mod middleware;

/// HTTP routes and server
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Prometheus metrics
pub mod metrics;

/// Liveness reporting
pub mod health;

/// Utility functions and helpers
pub mod utils;


pub use cli::*;
pub use config::*;
pub use error::*;
pub use health::*;
pub use metrics::*;
pub use scrape_service::*;
pub use types::*;
pub use utils::*;
