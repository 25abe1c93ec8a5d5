//! Screenshot storage
//!
//! Stored-mode screenshots leave the worker pool as raw bytes
//! ([`Screenshot::Pending`]) and are handed to a [`ScreenshotStore`] before
//! the batch is returned. Storage failures never fail a task: the result
//! reports `screenshotStored: false` instead.

use crate::config::StorageSettings;
use crate::utils::screenshot_filename;
use crate::{ScrapeError, Screenshot, TaskResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Path prefix under which [`LocalDirStore`] files are served.
pub const LOCAL_URL_PREFIX: &str = "/screenshots";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredScreenshot {
    pub url: Option<String>,
    pub stored: bool,
}

impl StoredScreenshot {
    pub fn not_stored() -> Self {
        Self {
            url: None,
            stored: false,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, filename: &str) -> StoredScreenshot;
}

/// Object key for an upload. The random segment keeps repeated occurrences
/// of one URL apart even within the same millisecond.
fn object_path(filename: &str) -> String {
    format!(
        "{}-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        filename
    )
}

/// Supabase storage bucket, accessed through its REST API.
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
    public_base_url: Option<String>,
}

impl SupabaseStore {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
            public_base_url,
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Option<Self> {
        match (&settings.supabase_url, &settings.supabase_service_key) {
            (Some(url), Some(key)) => Some(Self::new(
                url,
                key,
                &settings.supabase_bucket,
                settings.supabase_public_base_url.clone(),
            )),
            _ => None,
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), path),
            None => format!(
                "{}/storage/v1/object/public/{}/{}",
                self.base_url, self.bucket, path
            ),
        }
    }

    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<(), ScrapeError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ScrapeError::Storage(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScrapeError::Storage(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ScreenshotStore for SupabaseStore {
    async fn store(&self, bytes: Vec<u8>, filename: &str) -> StoredScreenshot {
        let path = object_path(filename);
        match self.upload(bytes, &path).await {
            Ok(()) => {
                debug!(bucket = %self.bucket, path = %path, "Screenshot uploaded");
                StoredScreenshot {
                    url: Some(self.public_url(&path)),
                    stored: true,
                }
            }
            Err(e) => {
                error!(bucket = %self.bucket, path = %path, "Supabase upload failed: {}", e);
                StoredScreenshot::not_stored()
            }
        }
    }
}

/// Screenshots written to a local directory served under `/screenshots`.
pub struct LocalDirStore {
    dir: PathBuf,
}

impl LocalDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    async fn write(&self, bytes: &[u8], name: &str) -> Result<(), ScrapeError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(name), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ScreenshotStore for LocalDirStore {
    async fn store(&self, bytes: Vec<u8>, filename: &str) -> StoredScreenshot {
        let name = object_path(filename);
        match self.write(&bytes, &name).await {
            Ok(()) => StoredScreenshot {
                url: Some(format!("{LOCAL_URL_PREFIX}/{name}")),
                stored: true,
            },
            Err(e) => {
                error!(dir = %self.dir.display(), "Failed to write screenshot {}: {}", name, e);
                StoredScreenshot::not_stored()
            }
        }
    }
}

/// Object storage when configured, the local screenshot directory otherwise.
pub fn store_from_settings(settings: &StorageSettings) -> Arc<dyn ScreenshotStore> {
    match SupabaseStore::from_settings(settings) {
        Some(store) => {
            info!(bucket = %settings.supabase_bucket, "Screenshots go to object storage");
            Arc::new(store)
        }
        None => {
            info!(dir = %settings.screenshot_dir.display(), "Screenshots go to local directory");
            Arc::new(LocalDirStore::new(settings.screenshot_dir.clone()))
        }
    }
}

/// Hand every pending screenshot in `results` to `store`, replacing it with
/// the stored location.
pub async fn store_pending(results: &mut [TaskResult], store: &dyn ScreenshotStore) {
    for result in results.iter_mut() {
        let filename = screenshot_filename(&result.url);
        let Some(slot) = result.screenshot_mut() else {
            continue;
        };
        if !matches!(slot, Some(Screenshot::Pending(_))) {
            continue;
        }
        if let Some(Screenshot::Pending(bytes)) = slot.take() {
            let stored = store.store(bytes, &filename).await;
            *slot = Some(Screenshot::Stored {
                screenshot_url: stored.url,
                screenshot_stored: stored.stored,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentFormat, RenderTask};
    use serde_json::json;

    fn result_with(url: &str, screenshot: Option<Screenshot>) -> TaskResult {
        let task = RenderTask {
            position: 0,
            url: url.to_string(),
        };
        TaskResult::success(&task, 0.5, "x".into(), ContentFormat::Html, screenshot)
    }

    #[test]
    fn test_public_url() {
        let store = SupabaseStore::new("https://proj.supabase.co/", "key", "shots", None);
        assert_eq!(
            store.public_url("1-a.png"),
            "https://proj.supabase.co/storage/v1/object/public/shots/1-a.png"
        );

        let store = SupabaseStore::new(
            "https://proj.supabase.co",
            "key",
            "shots",
            Some("https://cdn.test/shots/".into()),
        );
        assert_eq!(store.public_url("1-a.png"), "https://cdn.test/shots/1-a.png");
    }

    #[test]
    fn test_object_path_is_timestamped_and_unique() {
        let path = object_path("example.com.png");
        let parts: Vec<&str> = path.splitn(3, '-').collect();
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2], "example.com.png");

        assert_ne!(object_path("example.com.png"), object_path("example.com.png"));
    }

    #[test]
    fn test_store_selection() {
        assert!(SupabaseStore::from_settings(&StorageSettings::default()).is_none());

        let settings = StorageSettings {
            supabase_url: Some("https://proj.supabase.co".into()),
            supabase_service_key: Some("key".into()),
            ..Default::default()
        };
        assert!(SupabaseStore::from_settings(&settings).is_some());
    }

    #[tokio::test]
    async fn test_local_store_writes_file() {
        let dir = std::env::temp_dir().join(format!("page-scraper-{}", uuid::Uuid::new_v4()));
        let store = LocalDirStore::new(&dir);

        let stored = store.store(b"png".to_vec(), "a.test.png").await;
        assert!(stored.stored);
        let url = stored.url.unwrap();
        let name = url.strip_prefix("/screenshots/").unwrap();
        assert_eq!(std::fs::read(dir.join(name)).unwrap(), b"png");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_urls_get_their_own_files() {
        let dir = std::env::temp_dir().join(format!("page-scraper-{}", uuid::Uuid::new_v4()));
        let store = LocalDirStore::new(&dir);

        let mut results = vec![
            result_with("https://a.test/", Some(Screenshot::Pending(b"first".to_vec()))),
            result_with("https://a.test/", Some(Screenshot::Pending(b"second".to_vec()))),
        ];
        store_pending(&mut results, &store).await;

        let urls: Vec<String> = results
            .iter()
            .map(|r| {
                let value = serde_json::to_value(r).unwrap();
                assert_eq!(value["screenshotStored"], json!(true));
                value["screenshotUrl"].as_str().unwrap().to_string()
            })
            .collect();
        assert_ne!(urls[0], urls[1]);

        for (url, bytes) in urls.iter().zip([&b"first"[..], &b"second"[..]]) {
            let name = url.strip_prefix("/screenshots/").unwrap();
            assert_eq!(std::fs::read(dir.join(name)).unwrap(), bytes);
        }

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_store_pending_replaces_bytes() {
        let mut store = MockScreenshotStore::new();
        store
            .expect_store()
            .withf(|bytes, filename| bytes == b"png" && filename == "a.test_page.png")
            .times(1)
            .returning(|_, _| StoredScreenshot {
                url: Some("https://cdn.test/1-a.test_page.png".into()),
                stored: true,
            });

        let mut results = vec![
            result_with("https://a.test/page", Some(Screenshot::Pending(b"png".to_vec()))),
            result_with("https://b.test/", None),
        ];
        store_pending(&mut results, &store).await;

        let value = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(value["screenshotUrl"], json!("https://cdn.test/1-a.test_page.png"));
        assert_eq!(value["screenshotStored"], json!(true));
        assert!(results[1].clone().screenshot_mut().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_store_is_reported_not_raised() {
        let mut store = MockScreenshotStore::new();
        store
            .expect_store()
            .returning(|_, _| StoredScreenshot::not_stored());

        let mut results = vec![result_with("https://a.test/", Some(Screenshot::Pending(vec![1])))];
        store_pending(&mut results, &store).await;

        let value = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(value["screenshotUrl"], json!(null));
        assert_eq!(value["screenshotStored"], json!(false));
        assert_eq!(value["content"], json!("x"));
    }
}
