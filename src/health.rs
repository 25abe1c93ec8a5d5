use crate::renderer::RendererHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub renderer: RendererHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RendererHealth {
    pub running: bool,
    pub launches: usize,
}

/// Liveness report for `GET /health`.
///
/// The process is considered healthy whenever it can answer; a renderer that
/// is not running yet is launched on the next batch, so it is reported but
/// does not degrade the status.
pub struct HealthChecker {
    started: Instant,
    renderer: Arc<RendererHandle>,
}

impl HealthChecker {
    pub fn new(renderer: Arc<RendererHandle>) -> Self {
        Self {
            started: Instant::now(),
            renderer,
        }
    }

    pub fn report(&self) -> HealthReport {
        let status = self.renderer.status();
        HealthReport {
            status: "ok",
            uptime_seconds: self.started.elapsed().as_secs(),
            renderer: RendererHealth {
                running: status.running,
                launches: status.launches,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeLauncher;
    use serde_json::json;

    #[tokio::test]
    async fn test_report_tracks_renderer() {
        let handle = Arc::new(RendererHandle::new(FakeLauncher::with_sites([])));
        let checker = HealthChecker::new(handle.clone());

        let report = checker.report();
        assert_eq!(report.status, "ok");
        assert!(!report.renderer.running);

        handle.acquire().await.unwrap();
        let value = serde_json::to_value(checker.report()).unwrap();
        assert_eq!(value["renderer"], json!({"running": true, "launches": 1}));
        assert!(value["uptimeSeconds"].is_u64());
    }
}
