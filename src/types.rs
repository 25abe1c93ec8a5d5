//! Request and result types for scrape batches.

use crate::{validate_url, Config, ScrapeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Textual representation produced for a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Html,
    Text,
    Markdown,
}

impl ContentFormat {
    pub const ALL: [ContentFormat; 3] = [
        ContentFormat::Html,
        ContentFormat::Text,
        ContentFormat::Markdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Html => "html",
            ContentFormat::Text => "text",
            ContentFormat::Markdown => "markdown",
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFormat {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| {
                ScrapeError::validation("Invalid format. Use html | text | markdown")
            })
    }
}

/// Whether and how a full-page screenshot is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenshotMode {
    #[default]
    Off,
    /// Base64 bytes inline in the response
    Inline,
    /// Bytes handed to the screenshot store; the response carries its URL
    Stored,
}

impl ScreenshotMode {
    /// `false`/absent disables capture, `"base64"` returns inline bytes and
    /// any other truthy value stores the image.
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) | Some(Value::Bool(false)) => ScreenshotMode::Off,
            Some(Value::String(s)) if s == "base64" => ScreenshotMode::Inline,
            Some(Value::String(s)) if s.is_empty() => ScreenshotMode::Off,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => ScreenshotMode::Off,
            Some(_) => ScreenshotMode::Stored,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ScreenshotMode::Off)
    }
}

/// One URL occurrence waiting in a batch queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTask {
    /// Position of this occurrence in the caller's URL list
    pub position: usize,
    pub url: String,
}

/// Screenshot payload attached to a successful task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Screenshot {
    #[serde(rename_all = "camelCase")]
    Inline { screenshot_base64: String },
    #[serde(rename_all = "camelCase")]
    Stored {
        screenshot_url: Option<String>,
        screenshot_stored: bool,
    },
    /// Raw bytes awaiting upload. Serializes as an unstored screenshot so a
    /// batch that skipped the storage step still renders.
    #[serde(serialize_with = "pending_as_unstored")]
    Pending(Vec<u8>),
}

#[allow(clippy::ptr_arg)]
fn pending_as_unstored<S: serde::Serializer>(
    _bytes: &Vec<u8>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Screenshot::Stored {
        screenshot_url: None,
        screenshot_stored: false,
    }
    .serialize(serializer)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        content: String,
        content_format: ContentFormat,
        #[serde(flatten, skip_serializing_if = "Option::is_none")]
        screenshot: Option<Screenshot>,
    },
    Failure {
        error: String,
    },
}

/// Result for one URL occurrence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(skip)]
    pub position: usize,
    pub url: String,
    pub elapsed_seconds: f64,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn success(
        task: &RenderTask,
        elapsed_seconds: f64,
        content: String,
        content_format: ContentFormat,
        screenshot: Option<Screenshot>,
    ) -> Self {
        Self {
            position: task.position,
            url: task.url.clone(),
            elapsed_seconds,
            outcome: TaskOutcome::Success {
                content,
                content_format,
                screenshot,
            },
        }
    }

    pub fn failure(task: &RenderTask, elapsed_seconds: f64, error: impl ToString) -> Self {
        Self {
            position: task.position,
            url: task.url.clone(),
            elapsed_seconds,
            outcome: TaskOutcome::Failure {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Success { content, .. } => Some(content),
            TaskOutcome::Failure { .. } => None,
        }
    }

    pub fn content_format(&self) -> Option<ContentFormat> {
        match &self.outcome {
            TaskOutcome::Success { content_format, .. } => Some(*content_format),
            TaskOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Failure { error } => Some(error),
            TaskOutcome::Success { .. } => None,
        }
    }

    pub fn screenshot_mut(&mut self) -> Option<&mut Option<Screenshot>> {
        match &mut self.outcome {
            TaskOutcome::Success { screenshot, .. } => Some(screenshot),
            TaskOutcome::Failure { .. } => None,
        }
    }
}

/// A validated scrape batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    pub screenshot: ScreenshotMode,
    pub format: ContentFormat,
    pub concurrency: usize,
}

impl BatchRequest {
    pub fn new(urls: Vec<String>, format: ContentFormat) -> Self {
        Self {
            urls,
            screenshot: ScreenshotMode::Off,
            format,
            concurrency: 1,
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = RenderTask> + '_ {
        self.urls.iter().enumerate().map(|(position, url)| RenderTask {
            position,
            url: url.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMeta {
    pub count: usize,
    pub duration_ms: u64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub results: Vec<TaskResult>,
    pub meta: BatchMeta,
}

/// Body of `POST /scrape` as sent by callers, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeRequestBody {
    #[serde(default)]
    pub urls: Option<Value>,
    #[serde(default)]
    pub screenshot: Option<Value>,
    #[serde(default)]
    pub concurrency: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
    /// Deprecated: `clean: true` without a format means `text`
    #[serde(default)]
    pub clean: Option<bool>,
}

impl ScrapeRequestBody {
    /// Validate and normalise a raw body into a [`BatchRequest`].
    pub fn into_batch_request(self, config: &Config) -> Result<BatchRequest, ScrapeError> {
        let raw_urls = match self.urls {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => return Err(ScrapeError::validation("urls must be non-empty array")),
        };

        let format = match (&self.format, self.clean) {
            (Some(format), _) => format.parse::<ContentFormat>()?,
            (None, Some(true)) => ContentFormat::Text,
            (None, _) => ContentFormat::Html,
        };

        if format == ContentFormat::Markdown && !config.allow_markdown {
            return Err(ScrapeError::validation("Markdown disabled"));
        }

        let concurrency = resolve_concurrency(self.concurrency.as_ref(), config);

        let mut urls = Vec::with_capacity(raw_urls.len());
        for raw in &raw_urls {
            let text = match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            urls.push(validate_url(&text)?.to_string());
        }

        Ok(BatchRequest {
            urls,
            screenshot: ScreenshotMode::from_json(self.screenshot.as_ref()),
            format,
            concurrency,
        })
    }
}

/// Requested worker count: defaults when absent, invalid or below one, and
/// clamps to the configured ceiling.
pub fn resolve_concurrency(value: Option<&Value>, config: &Config) -> usize {
    let requested = match value {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.trunc() as i64),
        Some(Value::String(s)) => leading_integer(s),
        _ => None,
    };

    match requested {
        Some(n) if n >= 1 => (n as usize).min(config.max_concurrency),
        _ => config.default_concurrency.min(config.max_concurrency),
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    trimmed[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> ScrapeRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_format_defaults_and_clean_flag() {
        let config = Config::default();
        let request = body(json!({"urls": ["https://example.com"]}))
            .into_batch_request(&config)
            .unwrap();
        assert_eq!(request.format, ContentFormat::Html);
        assert_eq!(request.urls, vec!["https://example.com/"]);

        let request = body(json!({"urls": ["https://example.com"], "clean": true}))
            .into_batch_request(&config)
            .unwrap();
        assert_eq!(request.format, ContentFormat::Text);

        let request = body(json!({"urls": ["https://example.com"], "clean": true, "format": "html"}))
            .into_batch_request(&config)
            .unwrap();
        assert_eq!(request.format, ContentFormat::Html);
    }

    #[test]
    fn test_validation_errors() {
        let config = Config::default();
        let cases = [
            (json!({"urls": []}), "urls must be non-empty array"),
            (json!({}), "urls must be non-empty array"),
            (json!({"urls": "https://a.test"}), "urls must be non-empty array"),
            (
                json!({"urls": ["https://a.test"], "format": "pdf"}),
                "Invalid format. Use html | text | markdown",
            ),
            (json!({"urls": ["ftp://a.test"]}), "Unsupported protocol in ftp://a.test"),
            (json!({"urls": ["not a url"]}), "Invalid URL: not a url"),
        ];
        for (value, message) in cases {
            let err = body(value).into_batch_request(&config).unwrap_err();
            assert_eq!(err.to_string(), message);
        }
    }

    #[test]
    fn test_markdown_can_be_disabled() {
        let config = Config {
            allow_markdown: false,
            ..Default::default()
        };
        let err = body(json!({"urls": ["https://a.test"], "format": "markdown"}))
            .into_batch_request(&config)
            .unwrap_err();
        assert_eq!(err.to_string(), "Markdown disabled");
    }

    #[test]
    fn test_concurrency_resolution() {
        let config = Config::default();
        assert_eq!(resolve_concurrency(None, &config), 3);
        assert_eq!(resolve_concurrency(Some(&json!(1000)), &config), 5);
        assert_eq!(resolve_concurrency(Some(&json!(2)), &config), 2);
        assert_eq!(resolve_concurrency(Some(&json!("4")), &config), 4);
        assert_eq!(resolve_concurrency(Some(&json!("4 workers")), &config), 4);
        assert_eq!(resolve_concurrency(Some(&json!(0)), &config), 3);
        assert_eq!(resolve_concurrency(Some(&json!(-2)), &config), 3);
        assert_eq!(resolve_concurrency(Some(&json!("many")), &config), 3);
    }

    #[test]
    fn test_screenshot_modes() {
        assert_eq!(ScreenshotMode::from_json(None), ScreenshotMode::Off);
        assert_eq!(ScreenshotMode::from_json(Some(&json!(false))), ScreenshotMode::Off);
        assert_eq!(ScreenshotMode::from_json(Some(&json!("base64"))), ScreenshotMode::Inline);
        assert_eq!(ScreenshotMode::from_json(Some(&json!(true))), ScreenshotMode::Stored);
        assert_eq!(ScreenshotMode::from_json(Some(&json!("file"))), ScreenshotMode::Stored);
        assert_eq!(ScreenshotMode::from_json(Some(&json!(0))), ScreenshotMode::Off);
    }

    #[test]
    fn test_duplicate_urls_are_preserved() {
        let request = body(json!({"urls": ["https://a.test", "https://a.test"]}))
            .into_batch_request(&Config::default())
            .unwrap();
        let tasks: Vec<_> = request.tasks().collect();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].position, 0);
        assert_eq!(tasks[1].position, 1);
        assert_eq!(tasks[0].url, tasks[1].url);
    }

    #[test]
    fn test_result_serialization_has_exclusive_fields() {
        let task = RenderTask {
            position: 0,
            url: "https://a.test/".into(),
        };
        let ok = TaskResult::success(
            &task,
            1.25,
            "hello".into(),
            ContentFormat::Text,
            Some(Screenshot::Inline {
                screenshot_base64: "aGk=".into(),
            }),
        );
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(
            value,
            json!({
                "url": "https://a.test/",
                "elapsedSeconds": 1.25,
                "content": "hello",
                "contentFormat": "text",
                "screenshotBase64": "aGk="
            })
        );

        let failed = TaskResult::failure(&task, 0.5, "net::ERR_CONNECTION_REFUSED");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(
            value,
            json!({
                "url": "https://a.test/",
                "elapsedSeconds": 0.5,
                "error": "net::ERR_CONNECTION_REFUSED"
            })
        );
    }

    #[test]
    fn test_unuploaded_screenshot_serializes_as_unstored() {
        let task = RenderTask {
            position: 0,
            url: "https://a.test/".into(),
        };
        let result = TaskResult::success(
            &task,
            0.25,
            "<p>a</p>".into(),
            ContentFormat::Html,
            Some(Screenshot::Pending(b"png".to_vec())),
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "url": "https://a.test/",
                "elapsedSeconds": 0.25,
                "content": "<p>a</p>",
                "contentFormat": "html",
                "screenshotUrl": null,
                "screenshotStored": false
            })
        );
    }
}
