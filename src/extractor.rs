//! Content extraction strategies
//!
//! Turns a navigated page into one of the supported [`ContentFormat`]s.
//! Markdown conversion is a capability resolved once at startup: when no
//! converter is injected, markdown requests are served by the text strategy
//! and reported as `text`.

use crate::session::PageSession;
use crate::{ContentFormat, ScrapeError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Visible body text with script, style, noscript and iframe subtrees removed.
pub const TEXT_SCRIPT: &str = r#"(() => {
  const clone = document.body ? document.body.cloneNode(true) : null;
  if (!clone) return '';
  clone.querySelectorAll('script,style,noscript,iframe').forEach(n => n.remove());
  return clone.innerText || clone.textContent || '';
})()"#;

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Collapse runs of three or more newlines to exactly two, then trim.
pub fn normalize_text(raw: &str) -> String {
    BLANK_RUNS.replace_all(raw, "\n\n").trim().to_string()
}

/// HTML to Markdown transliteration.
#[cfg_attr(test, mockall::automock)]
pub trait MarkdownConverter: Send + Sync {
    fn convert(&self, html: &str) -> Result<String, ScrapeError>;
}

/// Markdown converter backed by `htmd`, using ATX (`#`) headings.
#[cfg(feature = "markdown")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmdConverter;

#[cfg(feature = "markdown")]
impl MarkdownConverter for HtmdConverter {
    fn convert(&self, html: &str) -> Result<String, ScrapeError> {
        use htmd::options::{HeadingStyle, Options};

        let converter = htmd::HtmlToMarkdown::builder()
            .options(Options {
                heading_style: HeadingStyle::Atx,
                ..Default::default()
            })
            .build();

        converter
            .convert(html)
            .map_err(|e| ScrapeError::Extraction(e.to_string()))
    }
}

#[derive(Clone)]
pub struct ContentExtractor {
    markdown: Option<Arc<dyn MarkdownConverter>>,
}

impl ContentExtractor {
    pub fn new(markdown: Option<Arc<dyn MarkdownConverter>>) -> Self {
        Self { markdown }
    }

    pub fn text_only() -> Self {
        Self { markdown: None }
    }

    /// Extractor with the converter compiled into this build, if any.
    pub fn with_default_markdown() -> Self {
        #[cfg(feature = "markdown")]
        {
            Self::new(Some(Arc::new(HtmdConverter)))
        }
        #[cfg(not(feature = "markdown"))]
        {
            Self::text_only()
        }
    }

    pub fn markdown_available(&self) -> bool {
        self.markdown.is_some()
    }

    /// Produce `format` from the page, returning the content and the format
    /// actually produced.
    pub async fn extract(
        &self,
        session: &PageSession,
        format: ContentFormat,
    ) -> Result<(String, ContentFormat), ScrapeError> {
        match format {
            ContentFormat::Html => Ok((session.content().await?, ContentFormat::Html)),
            ContentFormat::Text => Ok((self.text(session).await?, ContentFormat::Text)),
            ContentFormat::Markdown => self.markdown(session).await,
        }
    }

    async fn text(&self, session: &PageSession) -> Result<String, ScrapeError> {
        let raw = session.evaluate_string(TEXT_SCRIPT).await?;
        Ok(normalize_text(&raw))
    }

    async fn markdown(&self, session: &PageSession) -> Result<(String, ContentFormat), ScrapeError> {
        let Some(converter) = &self.markdown else {
            debug!("No markdown converter, extracting text for {}", session.url());
            return Ok((self.text(session).await?, ContentFormat::Text));
        };

        let html = session.content().await?;
        match converter.convert(&html) {
            Ok(markdown) => Ok((markdown, ContentFormat::Markdown)),
            Err(e) => {
                warn!("Markdown conversion failed for {}, extracting text: {}", session.url(), e);
                Ok((self.text(session).await?, ContentFormat::Text))
            }
        }
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::with_default_markdown()
    }
}
