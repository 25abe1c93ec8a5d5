//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the scraping service:
//! renderer settings, concurrency ceilings, the HTTP surface and screenshot
//! storage. Values are layered: defaults, an optional JSON file, environment
//! variables, then command-line overrides.

use crate::ScrapeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the scraping service
///
/// # Examples
///
/// ```rust
/// use page_scraper::Config;
///
/// let config = Config {
///     max_concurrency: 8,
///     ..Default::default()
/// };
/// assert_eq!(config.default_concurrency, 3);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Deployment environment name (default: "development")
    ///
    /// Controls log formatting: human-readable in development, JSON otherwise.
    pub env: String,

    /// Hard navigation timeout per page in milliseconds (default: 45000)
    pub navigation_timeout_ms: u64,

    /// Worker count used when a request does not ask for one (default: 3)
    pub default_concurrency: usize,

    /// Operator ceiling on workers per batch (default: 5)
    ///
    /// Requests asking for more are silently clamped to this value.
    pub max_concurrency: usize,

    /// Whether `format: "markdown"` requests are accepted (default: true)
    pub allow_markdown: bool,

    /// Run Chrome headless (default: true)
    pub headless: bool,

    /// Browser viewport used for rendering and screenshots
    pub viewport: Viewport,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string (default: Chrome default)
    pub user_agent: Option<String>,

    /// Log filter directive, e.g. "info" or "page_scraper=debug"
    pub log_level: Option<String>,

    /// HTTP server settings
    pub server: ServerSettings,

    /// Screenshot storage settings
    pub storage: StorageSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            navigation_timeout_ms: 45_000,
            default_concurrency: 3,
            max_concurrency: 5,
            allow_markdown: true,
            headless: true,
            viewport: Viewport::default(),
            chrome_path: None,
            user_agent: None,
            log_level: None,
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Config {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn is_development(&self) -> bool {
        self.env == "development"
    }

    /// Overlay values read through `lookup` (usually `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ScrapeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("APP_ENV").or_else(|| lookup("NODE_ENV")) {
            self.env = env;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_number("PORT", &port)?;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(headless) = lookup("HEADLESS") {
            self.headless = !headless.eq_ignore_ascii_case("false");
        }
        if let Some(timeout) = lookup("SCRAPE_NAV_TIMEOUT_MS") {
            self.navigation_timeout_ms = parse_number("SCRAPE_NAV_TIMEOUT_MS", &timeout)?;
        }
        if let Some(max) = lookup("SCRAPE_MAX_CONCURRENCY") {
            self.max_concurrency = parse_number("SCRAPE_MAX_CONCURRENCY", &max)?;
        }
        if let Some(default) = lookup("SCRAPE_DEFAULT_CONCURRENCY") {
            self.default_concurrency = parse_number("SCRAPE_DEFAULT_CONCURRENCY", &default)?;
        }
        if let Some(markdown) = lookup("ALLOW_MARKDOWN") {
            self.allow_markdown = markdown.eq_ignore_ascii_case("true");
        }
        if let Some(keys) = lookup("API_KEYS") {
            self.server.api_keys = parse_list(&keys);
        } else if let Some(key) = lookup("API_KEY") {
            self.server.api_keys = vec![key];
        }
        if let Some(window) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.server.rate_limit_window_ms = parse_number("RATE_LIMIT_WINDOW_MS", &window)?;
        }
        if let Some(max) = lookup("RATE_LIMIT_MAX") {
            self.server.rate_limit_max = parse_number("RATE_LIMIT_MAX", &max)?;
        }
        if let Some(origins) = lookup("CORS_ALLOW_ORIGINS") {
            self.server.allow_origins = parse_list(&origins);
        }
        if let Some(limit) = lookup("REQUEST_BODY_LIMIT") {
            self.server.request_body_limit = parse_body_limit(&limit)?;
        }
        if let Some(dir) = lookup("SCREENSHOT_DIR") {
            self.storage.screenshot_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.storage.supabase_url = Some(url);
        }
        if let Some(key) = lookup("SUPABASE_SERVICE_KEY") {
            self.storage.supabase_service_key = Some(key);
        }
        if let Some(bucket) = lookup("SUPABASE_BUCKET") {
            self.storage.supabase_bucket = bucket;
        }
        if let Some(base) = lookup("SUPABASE_PUBLIC_BASE_URL") {
            self.storage.supabase_public_base_url = Some(base);
        }
        if let Some(path) = lookup("CHROME_PATH") {
            self.chrome_path = Some(path);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_concurrency == 0 {
            return Err(ScrapeError::Configuration(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.default_concurrency == 0 {
            return Err(ScrapeError::Configuration(
                "default_concurrency must be greater than 0".into(),
            ));
        }
        if self.default_concurrency > self.max_concurrency {
            return Err(ScrapeError::Configuration(format!(
                "default_concurrency ({}) exceeds max_concurrency ({})",
                self.default_concurrency, self.max_concurrency
            )));
        }
        if self.navigation_timeout_ms == 0 {
            return Err(ScrapeError::Configuration(
                "navigation_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ScrapeError::Configuration(
                "viewport dimensions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP surface settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address (default: "0.0.0.0")
    pub host: String,

    /// Listen port (default: 3000)
    pub port: u16,

    /// Bearer tokens accepted by the auth middleware
    ///
    /// Authentication is disabled when the list is empty.
    pub api_keys: Vec<String>,

    /// Rate limit window in milliseconds (default: 60000)
    pub rate_limit_window_ms: u64,

    /// Requests allowed per client within one window (default: 60)
    pub rate_limit_max: u32,

    /// CORS allow list; any origin is accepted when empty
    pub allow_origins: Vec<String>,

    /// Maximum JSON body size in bytes (default: 1 MiB)
    pub request_body_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_keys: Vec::new(),
            rate_limit_window_ms: 60_000,
            rate_limit_max: 60,
            allow_origins: Vec::new(),
            request_body_limit: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

/// Where stored-mode screenshots go
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Local directory used when no object storage is configured
    pub screenshot_dir: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub supabase_bucket: String,
    /// Public URL prefix for uploaded objects, overriding the storage API path
    pub supabase_public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            screenshot_dir: PathBuf::from("screenshots"),
            supabase_url: None,
            supabase_service_key: None,
            supabase_bucket: "screenshots".to_string(),
            supabase_public_base_url: None,
        }
    }
}

impl StorageSettings {
    pub fn object_storage_enabled(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_service_key.is_some()
    }
}

/// Browser viewport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1366)
    pub width: u32,

    /// Viewport height in pixels (default: 768)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ScrapeError> {
    value
        .trim()
        .parse()
        .map_err(|_| ScrapeError::Configuration(format!("{key} must be a number, got '{value}'")))
}

/// Split a comma separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse sizes such as "1mb", "512kb" or "2048".
pub fn parse_body_limit(value: &str) -> Result<usize, ScrapeError> {
    let lower = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1)
    } else {
        (lower.as_str(), 1)
    };
    let amount: usize = parse_number("REQUEST_BODY_LIMIT", digits)?;
    Ok(amount * multiplier)
}

/// Generate Chrome command-line arguments based on configuration
///
/// # Examples
///
/// ```rust
/// use page_scraper::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, ScrapeError> {
    use chromiumoxide::browser::BrowserConfig;
    use chromiumoxide::handler::viewport::Viewport as ChromeViewport;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .viewport(Some(ChromeViewport {
            width: config.viewport.width,
            height: config.viewport.height,
            ..Default::default()
        }))
        .request_timeout(config.navigation_timeout())
        .args(get_chrome_args(config));

    if !config.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScrapeError::RendererLaunch)
}
