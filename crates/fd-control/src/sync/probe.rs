//! Target health probes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use fd_core::model::ManagedTarget;
use fd_core::types::TargetKind;

/// One health observation of a target. `Err` carries a human reason.
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn probe(&self, target: &ManagedTarget) -> Result<(), String>;
}

/// Endpoint check over HTTP, falling back to the root directory for local targets
pub struct HttpProbe {
    http: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    async fn check_endpoint(&self, endpoint: &str) -> Result<(), String> {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("{} answered HTTP {}", url, resp.status())),
            Err(e) if e.is_timeout() => Err(format!("{} timed out", url)),
            Err(e) => Err(format!("connection to {} failed: {}", url, e)),
        }
    }
}

#[async_trait]
impl TargetProbe for HttpProbe {
    async fn probe(&self, target: &ManagedTarget) -> Result<(), String> {
        if let Some(endpoint) = &target.endpoint {
            return self.check_endpoint(endpoint).await;
        }
        match target.kind {
            TargetKind::Local => match tokio::fs::metadata(&target.root_dir).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                Ok(_) => Err(format!("{} is not a directory", target.root_dir.display())),
                Err(e) => Err(format!("{}: {}", target.root_dir.display(), e)),
            },
            TargetKind::Remote => Err("remote target has no health endpoint".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fd_core::types::{TargetId, TargetOrigin, TargetPurpose};

    fn target(kind: TargetKind, root: &std::path::Path) -> ManagedTarget {
        let now = Utc::now();
        ManagedTarget {
            id: TargetId::new("t1"),
            label: "t1".to_string(),
            kind,
            root_dir: root.to_path_buf(),
            poll_interval: Duration::from_secs(30),
            enabled: true,
            origin: TargetOrigin::User,
            purpose: TargetPurpose::Production,
            endpoint: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_local_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HttpProbe::new(Duration::from_secs(1));

        assert!(probe.probe(&target(TargetKind::Local, dir.path())).await.is_ok());

        let missing = dir.path().join("missing");
        let err = probe
            .probe(&target(TargetKind::Local, &missing))
            .await
            .unwrap_err();
        assert!(err.contains("missing"));
    }

    #[tokio::test]
    async fn test_remote_without_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HttpProbe::new(Duration::from_secs(1));
        assert!(probe
            .probe(&target(TargetKind::Remote, dir.path()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_endpoint_health() {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new()
            .route("/ok/health", get(|| async { "ok" }))
            .route("/down/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let probe = HttpProbe::new(Duration::from_secs(5));
        let mut t = target(TargetKind::Remote, dir.path());

        t.endpoint = Some(format!("http://{}/ok/", addr));
        assert!(probe.probe(&t).await.is_ok());

        t.endpoint = Some(format!("http://{}/down", addr));
        let err = probe.probe(&t).await.unwrap_err();
        assert!(err.contains("503"));
    }
}
