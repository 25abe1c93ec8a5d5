use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("{0}")]
    Validation(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Navigation timeout of {} ms exceeded", .timeout.as_millis())]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Content extraction failed: {0}")]
    Extraction(String),

    #[error("Screenshot capture failed: {0}")]
    Screenshot(String),

    #[error("Renderer launch failed: {0}")]
    RendererLaunch(String),

    #[error("Renderer fault: {0}")]
    RendererFault(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScrapeError {
    pub fn validation(message: impl Into<String>) -> Self {
        ScrapeError::Validation(message.into())
    }

    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        ScrapeError::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that belong to a single task and are recorded in its result
    /// instead of failing the batch.
    pub fn is_task_level(&self) -> bool {
        matches!(
            self,
            ScrapeError::Navigation { .. }
                | ScrapeError::NavigationTimeout { .. }
                | ScrapeError::Extraction(_)
                | ScrapeError::Screenshot(_)
                | ScrapeError::RendererFault(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScrapeError::Validation(_) => ErrorSeverity::Low,
            ScrapeError::Navigation { .. } | ScrapeError::NavigationTimeout { .. } => {
                ErrorSeverity::Low
            }
            ScrapeError::RendererLaunch(_) | ScrapeError::Configuration(_) => ErrorSeverity::High,
            ScrapeError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::RendererFault(err.to_string())
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScrapeError::Internal(err.to_string())
    }
}
