//! `tabbridge-cockpit` – HTTP + WebSocket surface of the bridge.
//!
//! Boots an axum server (default port `8080`) that:
//!
//! 1. **Serves** the REST API under `/api` (configuration, sensor snapshot,
//!    file upload/download/browse, button actions, host metrics).
//!
//! 2. **Streams** sensor and system updates to every connected client over
//!    `/ws`, starting with an `init` snapshot.
//!
//! 3. **Accepts** upstream `action` messages on the same socket and answers
//!    each with an `action_result` to the sender only.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabbridge_cockpit::{AppState, CockpitServer};
//! use tabbridge_kernel::ValidatedConfig;
//! use tabbridge_middleware::{BroadcastHub, BusPublisher, SensorCache};
//!
//! async fn run(config: Arc<ValidatedConfig>, publisher: Arc<dyn BusPublisher>) {
//!     let state = AppState::new(
//!         config,
//!         Arc::new(SensorCache::new()),
//!         Arc::new(BroadcastHub::default()),
//!         publisher,
//!     );
//!     CockpitServer::new(state).run().await.expect("server failed");
//! }
//! ```

pub mod api;
pub mod server;
pub mod system;
pub mod ws;

#[cfg(test)]
mod testing;

pub use api::{ActionOutcome, ActionRequest, ApiError, FileOutcome};
pub use server::{AppState, CockpitServer, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, router, serve};
pub use system::{MemoryStats, SysinfoProbe, SystemProbe, SystemStats};
