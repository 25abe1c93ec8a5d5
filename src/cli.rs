use crate::server::{self, AppState};
use crate::storage::{store_from_settings, store_pending};
use crate::{Config, ScrapeRequestBody, ScrapeService, ScreenshotMode};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "page-scraper")]
#[command(about = "Headless-browser batch scraper with an HTTP API")]
#[command(version)]
pub struct Cli {
    /// Defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "HTTP listen port")]
    pub port: Option<u16>,

    #[arg(long, global = true, help = "Maximum workers per batch")]
    pub max_concurrency: Option<usize>,

    #[arg(long, global = true, help = "Navigation timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        #[arg(long, help = "Bind address")]
        host: Option<String>,
    },

    /// Scrape URLs once and print the batch result as JSON
    Scrape {
        #[arg(short, long = "url", help = "URL to scrape (repeatable)")]
        urls: Vec<String>,

        #[arg(short, long, help = "File containing URLs (one per line)")]
        input: Option<PathBuf>,

        #[arg(short, long, default_value = "html", help = "html | text | markdown")]
        format: String,

        #[arg(short, long, help = "Workers for this batch")]
        concurrency: Option<usize>,

        #[arg(long, value_enum, default_value_t = ScreenshotArg::Off)]
        screenshot: ScreenshotArg,

        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },

    /// Validate the effective configuration (`--config`, environment, flags)
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScreenshotArg {
    Off,
    Base64,
    Store,
}

impl ScreenshotArg {
    fn as_json(self) -> Value {
        match self {
            ScreenshotArg::Off => json!(false),
            ScreenshotArg::Base64 => json!("base64"),
            ScreenshotArg::Store => json!(true),
        }
    }
}

/// Defaults, then the config file, then the environment, then flags.
pub async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path).await?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

async fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn apply_overrides(config: &mut Config, args: &Cli) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
        config.default_concurrency = config.default_concurrency.min(max.max(1));
    }
    if let Some(timeout) = args.timeout_ms {
        config.navigation_timeout_ms = timeout;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }
    if let Some(Commands::Serve { host: Some(host) }) = &args.command {
        config.server.host = host.clone();
    }
}

/// Human-readable logs in development, JSON lines elsewhere. `RUST_LOG`
/// wins over the configured level.
pub fn setup_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let fallback = match (&config.log_level, verbose) {
        (_, true) => "debug".to_string(),
        (Some(level), false) => level.clone(),
        (None, false) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&fallback))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = if config.is_development() {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))
}

pub struct CliRunner {
    pub config: Config,
    pub service: Arc<ScrapeService>,
    metrics: Option<PrometheusHandle>,
}

impl CliRunner {
    pub fn new(config: Config, metrics: Option<PrometheusHandle>) -> Self {
        let service = Arc::new(ScrapeService::with_chrome(config.clone()));
        Self {
            config,
            service,
            metrics,
        }
    }

    pub async fn run(&self, command: Option<Commands>) -> anyhow::Result<()> {
        match command.unwrap_or(Commands::Serve { host: None }) {
            Commands::Serve { .. } => self.serve().await,
            Commands::Scrape {
                urls,
                input,
                format,
                concurrency,
                screenshot,
                pretty,
            } => {
                tokio::select! {
                    result = self.scrape(urls, input, format, concurrency, screenshot, pretty) => result,
                    _ = server::shutdown_signal() => {
                        warn!("Scrape interrupted");
                        Ok(())
                    }
                }
            }
            Commands::Validate => {
                print_config_summary(&self.config);
                Ok(())
            }
        }
    }

    async fn serve(&self) -> anyhow::Result<()> {
        if !self.service.markdown_available() {
            info!("Markdown conversion unavailable; markdown requests return text");
        }
        let store = store_from_settings(&self.config.storage);
        let mut state = AppState::new(self.service.clone(), store);
        if let Some(handle) = &self.metrics {
            state = state.with_metrics(handle.clone());
        }
        server::serve(state).await?;
        Ok(())
    }

    async fn scrape(
        &self,
        mut urls: Vec<String>,
        input: Option<PathBuf>,
        format: String,
        concurrency: Option<usize>,
        screenshot: ScreenshotArg,
        pretty: bool,
    ) -> anyhow::Result<()> {
        if let Some(path) = &input {
            let from_file = read_urls_from_file(path).await?;
            info!("Loaded {} URLs from {}", from_file.len(), path.display());
            urls.extend(from_file);
        }
        if urls.is_empty() {
            bail!("no URLs given; pass them as arguments or with --input");
        }

        let body = ScrapeRequestBody {
            urls: Some(json!(urls)),
            screenshot: Some(screenshot.as_json()),
            concurrency: concurrency.map(|c| json!(c)),
            format: Some(format),
            clean: None,
        };
        let request = body.into_batch_request(&self.config)?;
        let stored = request.screenshot == ScreenshotMode::Stored;

        let mut batch = self.service.run_batch(request).await?;
        if stored {
            let store = store_from_settings(&self.config.storage);
            store_pending(&mut batch.results, store.as_ref()).await;
        }

        let failed = batch.results.iter().filter(|r| !r.is_success()).count();
        info!(
            "Scraped {} URLs in {:.3}s ({} failed)",
            batch.meta.count, batch.meta.duration_seconds, failed
        );

        let output = if pretty {
            serde_json::to_string_pretty(&batch)?
        } else {
            serde_json::to_string(&batch)?
        };
        println!("{output}");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }
}

fn print_config_summary(config: &Config) {
    println!("Configuration is valid:");
    println!("  Environment: {}", config.env);
    println!("  Navigation timeout: {} ms", config.navigation_timeout_ms);
    println!(
        "  Concurrency: default {}, max {}",
        config.default_concurrency, config.max_concurrency
    );
    println!("  Markdown allowed: {}", config.allow_markdown);
    println!(
        "  Viewport: {}x{}",
        config.viewport.width, config.viewport.height
    );
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!(
        "  Screenshot storage: {}",
        if config.storage.object_storage_enabled() {
            "object storage"
        } else {
            "local directory"
        }
    );
}

/// One URL per line; blank lines and `#` comments are skipped.
pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
