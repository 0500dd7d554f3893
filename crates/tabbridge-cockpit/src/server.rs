//! [`CockpitServer`] – HTTP + WebSocket front of the bridge.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * `/api/*` → REST handlers in [`crate::api`].
//! * `/ws` → real-time channel in [`crate::ws`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tabbridge_kernel::{FileGateway, ValidatedConfig};
use tabbridge_middleware::{ActionDispatcher, BroadcastHub, BusPublisher, SensorCache};
use tabbridge_types::BridgeError;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::system::{SysinfoProbe, SystemProbe};
use crate::{api, ws};

/// Default TCP port for the HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8080;

/// Request body ceiling applied to every route (uploads included).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything a handler may touch. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ValidatedConfig>,
    pub cache: Arc<SensorCache>,
    pub hub: Arc<BroadcastHub>,
    pub files: Arc<FileGateway>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub probe: Arc<dyn SystemProbe>,
    /// Where multipart uploads land before policy checks.
    pub staging_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        config: Arc<ValidatedConfig>,
        cache: Arc<SensorCache>,
        hub: Arc<BroadcastHub>,
        publisher: Arc<dyn BusPublisher>,
    ) -> Self {
        Self {
            files: Arc::new(FileGateway::new(Arc::clone(&config))),
            dispatcher: Arc::new(ActionDispatcher::new(Arc::clone(&config), publisher)),
            config,
            cache,
            hub,
            probe: Arc::new(SysinfoProbe::new()),
            staging_dir: std::env::temp_dir().join("tabbridge-staging"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Replace the host metrics source (builder-style).
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

/// Full route table with state attached.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    api::routes()
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// HTTP + WebSocket server over one [`AppState`].
///
/// # Example
///
/// ```rust,no_run
/// use tabbridge_cockpit::{AppState, CockpitServer};
///
/// async fn serve(state: AppState) {
///     CockpitServer::new(state)
///         .with_port(9000)
///         .run_until(async {
///             let _ = tokio::signal::ctrl_c().await;
///         })
///         .await
///         .expect("server failed");
/// }
/// ```
pub struct CockpitServer {
    state: AppState,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until the process is killed.
    pub async fn run(self) -> Result<(), BridgeError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind `0.0.0.0:<port>` and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the listener cannot bind.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(%addr, error = %e, "bind failed");
            BridgeError::Io(e)
        })?;
        info!("listening on http://localhost:{}", self.port);
        serve(listener, self.state, shutdown).await
    }
}

/// Serve `state` on an already-bound listener.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), BridgeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::connect_async;

    #[test]
    fn default_port_is_8080() {
        let fx = Fixture::new();
        assert_eq!(CockpitServer::new(fx.state.clone()).port(), DEFAULT_PORT);
    }

    #[test]
    fn with_port_overrides_default() {
        let fx = Fixture::new();
        assert_eq!(CockpitServer::new(fx.state.clone()).with_port(9999).port(), 9999);
    }

    async fn next_json<S>(ws: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_streams_init_updates_and_action_results() {
        let fx = Fixture::new();
        fx.pipeline.ingest("sensor/temperature", b"20.0");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, fx.state.clone(), std::future::pending()));

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let init = next_json(&mut ws).await;
        assert_eq!(init["type"], "init");
        assert_eq!(init["sensors"]["temperature"]["value"], 20.0);

        // Unconfigured topic first: the next frame must be the configured one.
        fx.pipeline.ingest("sensor/unconfigured", b"99");
        fx.pipeline.ingest("sensor/temperature", b"21.5");
        let update = next_json(&mut ws).await;
        assert_eq!(update["type"], "sensor_update");
        assert_eq!(update["sensor"], "temperature");
        assert_eq!(update["data"]["value"], 21.5);
        assert_eq!(update["data"]["unit"], "°C");
        assert!(fx.state.cache.get("unconfigured").is_none());

        ws.send(Message::Text(
            r#"{"type":"action","action":"pump_on","value":1}"#.into(),
        ))
        .await
        .unwrap();
        let result = next_json(&mut ws).await;
        assert_eq!(result["type"], "action_result");
        assert_eq!(result["ack"], "pump_on");
        assert_eq!(result["success"], true);
        assert_eq!(fx.publisher.published(), vec![("cmd/pump".to_string(), b"1".to_vec())]);

        ws.close(None).await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn closed_websocket_is_removed_from_hub() {
        let fx = Fixture::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, fx.state.clone(), std::future::pending()));

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        next_json(&mut ws).await; // init
        assert_eq!(fx.state.hub.client_count(), 1);

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if fx.state.hub.client_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("client was not unregistered");
    }
}
