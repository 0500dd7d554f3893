//! Shared fixture for router and WebSocket tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tabbridge_kernel::ConfigValidator;
use tabbridge_middleware::{
    BroadcastHub, BusPublisher, SensorCache, TelemetryPipeline, TopicRegistry,
};
use tabbridge_types::{BridgeError, Configuration};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::server::{AppState, router};
use crate::system::{MemoryStats, SystemProbe, SystemStats};

#[derive(Default)]
pub(crate) struct FakePublisher {
    pub connected: AtomicBool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakePublisher {
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl BusPublisher for FakePublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        Err(BridgeError::BrokerUnavailable("broker offline".into()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

pub(crate) struct FixedProbe;

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn snapshot(&self) -> Result<SystemStats, BridgeError> {
        Ok(SystemStats {
            uptime: 42,
            cpu: 12.5,
            memory: MemoryStats::new(1000, 250),
        })
    }
}

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub state: AppState,
    pub pipeline: Arc<TelemetryPipeline>,
    pub publisher: Arc<FakePublisher>,
}

impl Fixture {
    /// One sensor, one button, an upload policy (`.txt`/`.csv`, 64 bytes max)
    /// and a download root containing `report.txt`, `notes.bin` and
    /// `sub/inner.txt`.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let exports = dir.path().join("exports");
        std::fs::create_dir_all(exports.join("sub")).unwrap();
        std::fs::write(exports.join("report.txt"), b"report body").unwrap();
        std::fs::write(exports.join("notes.bin"), b"\x00\x01").unwrap();
        std::fs::write(exports.join("sub").join("inner.txt"), b"inner").unwrap();

        let config: Configuration = serde_json::from_value(json!({
            "broker": {"host": "localhost", "port": 1883, "password": "secret"},
            "tabs": [
                {"id": "telemetry", "members": [
                    {"type": "sensor", "topic": "sensor/temperature", "unit": "°C"},
                    {"type": "button", "button_name": "pump_on", "publish_topic": "cmd/pump"}
                ]},
                {"id": "files", "members": [
                    {"type": "upload", "button_name": "logs",
                     "upload_directory": uploads.to_string_lossy(),
                     "allowed_extensions": [".txt", ".csv"], "max_file_size": 64},
                    {"type": "download", "button_name": "exports",
                     "root_directory": exports.to_string_lossy(),
                     "allowed_extensions": [".txt"]}
                ]}
            ]
        }))
        .unwrap();
        let config = Arc::new(ConfigValidator::validate(config).unwrap());

        let cache = Arc::new(SensorCache::new());
        let hub = Arc::new(BroadcastHub::default());
        let pipeline = Arc::new(TelemetryPipeline::new(
            TopicRegistry::from_config(&config),
            Arc::clone(&cache),
            Arc::clone(&hub),
        ));
        let publisher = Arc::new(FakePublisher {
            connected: AtomicBool::new(true),
            ..Default::default()
        });
        let state = AppState::new(config, cache, hub, publisher.clone())
            .with_probe(Arc::new(FixedProbe))
            .with_staging_dir(dir.path().join("staging"));

        Self {
            dir,
            state,
            pipeline,
            publisher,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }
}

/// Run one request; return status, headers and raw body.
pub(crate) async fn send_raw(
    app: Router,
    request: Request<Body>,
) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

/// Run one request and parse the body as JSON.
pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send_raw(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

pub(crate) fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub(crate) fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Multipart upload with an optional `button_name` field sent after the file.
pub(crate) fn multipart_upload(
    file_name: &str,
    data: &[u8],
    button_name: Option<&str>,
) -> Request<Body> {
    const BOUNDARY: &str = "tabbridge-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    if let Some(name) = button_name {
        let field = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"button_name\"\r\n\r\n{name}\r\n"
        );
        body.extend_from_slice(field.as_bytes());
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}
