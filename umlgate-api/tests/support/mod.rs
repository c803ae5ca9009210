//! Shared wiring for the integration tests.
#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use umlgate_api::{ApiConfig, AppState, AvailabilityCoordinator, ServiceHandle, ServiceLauncher};
use umlgate_core::{AnalysisUpstream, ServiceError};
use umlgate_test_utils::MockUpstream;

/// Binds the service port after `delay`, standing in for a slow interpreter.
pub struct BindingLauncher {
    pub port: u16,
    pub delay: Duration,
    pub launches: AtomicUsize,
    listener: Mutex<Option<TcpListener>>,
}

impl BindingLauncher {
    pub fn new(port: u16, delay: Duration) -> Self {
        Self {
            port,
            delay,
            launches: AtomicUsize::new(0),
            listener: Mutex::new(None),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceLauncher for BindingLauncher {
    async fn launch(&self) -> Result<ServiceHandle, ServiceError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .map_err(|e| ServiceError::SpawnFailed { reason: e.to_string() })?;
        *self.listener.lock() = Some(listener);
        Ok(ServiceHandle::unowned())
    }
}

/// Never manages to start anything.
pub struct RefusingLauncher;

#[async_trait]
impl ServiceLauncher for RefusingLauncher {
    async fn launch(&self) -> Result<ServiceHandle, ServiceError> {
        Err(ServiceError::SpawnFailed {
            reason: "launching disabled in tests".to_string(),
        })
    }
}

pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A gateway wired to a `MockUpstream`, with cache and upload dirs in a
/// temporary directory.
pub struct Harness {
    pub state: AppState,
    pub upstream: Arc<MockUpstream>,
    pub dir: TempDir,
    // Keeps the fake service port accepting connections.
    service: Option<TcpListener>,
}

impl Harness {
    /// Service reachable, autostart off, no rate limit.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(configure: impl FnOnce(ApiConfig) -> ApiConfig) -> Self {
        let service = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = service.local_addr().unwrap().port();
        Self::build(port, Some(service), configure, Arc::new(RefusingLauncher))
    }

    /// Nothing listens on the service port.
    pub fn with_service_down(configure: impl FnOnce(ApiConfig) -> ApiConfig) -> Self {
        Self::build(free_port(), None, configure, Arc::new(RefusingLauncher))
    }

    /// Service down but eligible for autostart through `launcher`.
    pub fn with_launcher(launcher: Arc<BindingLauncher>) -> Self {
        let port = launcher.port;
        Self::build(port, None, |config| config.with_autostart(true), launcher)
    }

    fn build(
        port: u16,
        service: Option<TcpListener>,
        configure: impl FnOnce(ApiConfig) -> ApiConfig,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ApiConfig::default()
            .with_cache_dir(dir.path().join("cache"))
            .with_upload_dir(dir.path().join("uploads"))
            .with_autostart(false)
            .without_rate_limit();
        config.upstream_url = format!("http://127.0.0.1:{}", port);
        config.probe_timeout = Duration::from_millis(200);
        config.startup_probe_timeout = Duration::from_secs(3);
        let config = configure(config);

        std::fs::create_dir_all(&config.cache_dir).unwrap();
        std::fs::create_dir_all(&config.upload_dir).unwrap();

        let upstream = Arc::new(MockUpstream::new());
        let availability = AvailabilityCoordinator::new(
            &config.upstream_url,
            config.autostart,
            config.probe_timeout,
            config.startup_probe_timeout,
            launcher,
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));

        let state = AppState::new(
            config,
            upstream.clone() as Arc<dyn AnalysisUpstream>,
            Arc::new(availability),
        );

        Self {
            state,
            upstream,
            dir,
            service,
        }
    }

    /// A second gateway over the same directories, as after a restart.
    pub fn restarted(&self) -> (AppState, Arc<MockUpstream>) {
        let upstream = Arc::new(MockUpstream::new());
        let state = AppState::new(
            self.state.config.as_ref().clone(),
            upstream.clone() as Arc<dyn AnalysisUpstream>,
            self.state.availability.clone(),
        );
        (state, upstream)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.state.config.upload_dir.clone()
    }

    pub fn uploads_left(&self) -> usize {
        std::fs::read_dir(self.upload_dir()).map(|d| d.count()).unwrap_or(0)
    }

    pub fn router(&self) -> axum::Router {
        umlgate_api::create_router(self.state.clone())
    }
}

/// Bytes that start with the ZIP local file header.
pub fn zip_bytes() -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0u8; 60]);
    bytes
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub const BOUNDARY: &str = "umlgate-test-boundary";

/// A `multipart/form-data` request with one file field.
pub fn multipart_request(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
