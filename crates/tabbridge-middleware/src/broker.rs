//! Broker session lifecycle.
//!
//! [`BrokerConnectionManager::start`] spawns the `rumqttc` event loop and
//! returns a handle implementing [`BusPublisher`]. The loop:
//!
//! 1. On every `ConnAck` marks the link [`LinkState::Up`] and subscribes the
//!    full registered topic set. Sessions are clean, so subscriptions never
//!    survive a reconnect on the broker side.
//! 2. Hands every `Publish` to the [`TelemetryPipeline`].
//! 3. On a poll error marks the link [`LinkState::Down`] and waits for either
//!    the retry delay or an on-demand reconnect request before polling again.
//!
//! Link state is published on a `watch` channel so the action path can
//! wait for a reconnect without polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, SubscribeReasonCode,
};
use tabbridge_types::{BridgeError, BrokerEndpoint};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{BusClient, BusPublisher};
use crate::pipeline::TelemetryPipeline;

/// Broker keep-alive floor accepted by the client library.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Up,
    Down,
}

/// Timing knobs for the broker session.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Pause between automatic reconnect attempts.
    pub retry_delay: Duration,
    /// How long an on-demand reconnect may take before the action fails.
    pub reconnect_timeout: Duration,
    /// Request channel depth between client handles and the event loop.
    pub channel_capacity: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            reconnect_timeout: Duration::from_secs(5),
            channel_capacity: 64,
        }
    }
}

/// Build client options from the configured endpoint.
pub fn mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let client_id = endpoint
        .client_id
        .clone()
        .unwrap_or_else(|| format!("tabbridge-{}", Uuid::new_v4().simple()));
    let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
    options.set_keep_alive(Duration::from_secs(
        endpoint.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
    ));
    options.set_clean_session(true);
    if let Some(username) = &endpoint.username {
        options.set_credentials(username.clone(), endpoint.password.clone().unwrap_or_default());
    }
    options
}

// ---------------------------------------------------------------------------
// Session (event handling, generic over the client for tests)
// ---------------------------------------------------------------------------

/// Reacts to broker events for one long-lived connection.
pub struct BrokerSession<C> {
    client: C,
    topics: Vec<String>,
    pipeline: Arc<TelemetryPipeline>,
    state: watch::Sender<LinkState>,
    subscribed: Vec<String>,
}

impl<C: BusClient> BrokerSession<C> {
    /// The subscription set is the pipeline's registered topics.
    pub fn new(
        client: C,
        pipeline: Arc<TelemetryPipeline>,
        state: watch::Sender<LinkState>,
    ) -> Self {
        let topics = pipeline.registry().topics().to_vec();
        Self {
            client,
            topics,
            pipeline,
            state,
            subscribed: Vec::new(),
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(
                        session_present = ack.session_present,
                        "broker connection established"
                    );
                    self.state.send_replace(LinkState::Up);
                    self.resubscribe().await;
                } else {
                    warn!(code = ?ack.code, "broker refused connection");
                    self.mark_down("connection refused");
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.pipeline.ingest(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                for (index, code) in ack.return_codes.iter().enumerate() {
                    if matches!(code, SubscribeReasonCode::Failure) {
                        warn!(pkid = ack.pkid, index, "broker rejected subscription");
                    }
                }
            }
            Event::Incoming(Packet::Disconnect) => self.mark_down("broker sent disconnect"),
            Event::Incoming(packet) => debug!(?packet, "broker packet"),
            Event::Outgoing(_) => {}
        }
    }

    /// Subscribe every registered topic. Returns how many succeeded.
    pub async fn resubscribe(&mut self) -> usize {
        self.subscribed.clear();
        for topic in &self.topics {
            match self.client.subscribe(topic).await {
                Ok(()) => {
                    debug!(topic = %topic, "subscribed");
                    self.subscribed.push(topic.clone());
                }
                Err(e) => warn!(topic = %topic, error = %e, "subscribe failed"),
            }
        }
        info!(
            subscribed = self.subscribed.len(),
            configured = self.topics.len(),
            "sensor topics subscribed"
        );
        self.subscribed.len()
    }

    pub fn mark_down(&self, reason: &str) {
        let previous = self.state.send_replace(LinkState::Down);
        if previous != LinkState::Down {
            warn!(reason, "broker link down");
        }
    }

    /// Topics subscribed on the most recent (re)connect.
    pub fn subscribed(&self) -> &[String] {
        &self.subscribed
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    mut session: BrokerSession<AsyncClient>,
    reconnect: Arc<Notify>,
    retry_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(event) => session.handle_event(event).await,
            Err(e) => {
                session.mark_down(&e.to_string());
                debug!(error = %e, "broker poll error");
                wait_before_retry(&reconnect, retry_delay).await;
            }
        }
    }
}

/// Pause after a poll error. A reconnect request made during the pause ends
/// it early.
async fn wait_before_retry(reconnect: &Notify, retry_delay: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(retry_delay) => {}
        _ = reconnect.notified() => debug!("on-demand reconnect requested"),
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Handle to the running broker session.
pub struct BrokerConnectionManager {
    client: AsyncClient,
    state: watch::Receiver<LinkState>,
    reconnect: Arc<Notify>,
    reconnect_timeout: Duration,
}

impl BrokerConnectionManager {
    /// Spawn the event loop. The returned task runs until aborted.
    pub fn start(
        endpoint: &BrokerEndpoint,
        pipeline: Arc<TelemetryPipeline>,
        options: BrokerOptions,
    ) -> (Arc<Self>, JoinHandle<()>) {
        // Subscriptions are queued without waiting; leave room for the whole
        // topic set so a fresh connect never has to drop one.
        let capacity = options.channel_capacity.max(pipeline.registry().len() + 1);
        let (client, event_loop) = AsyncClient::new(mqtt_options(endpoint), capacity);
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let reconnect = Arc::new(Notify::new());

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            topics = pipeline.registry().len(),
            "starting broker session"
        );
        let session = BrokerSession::new(client.clone(), pipeline, state_tx);
        let task = tokio::spawn(run_event_loop(
            event_loop,
            session,
            Arc::clone(&reconnect),
            options.retry_delay,
        ));

        let manager = Arc::new(Self {
            client,
            state: state_rx,
            reconnect,
            reconnect_timeout: options.reconnect_timeout,
        });
        (manager, task)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Send a DISCONNECT; errors are ignored during shutdown.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "broker disconnect failed");
        }
    }
}

#[async_trait]
impl BusPublisher for BrokerConnectionManager {
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Up
    }

    /// Cut the current retry pause short, then wait for the link to come up.
    ///
    /// Only a loop already paused is woken. A request made while the loop is
    /// polling is not remembered, so it cannot shorten a later pause.
    async fn reconnect(&self) -> Result<(), BridgeError> {
        self.reconnect.notify_waiters();
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(
            self.reconnect_timeout,
            state.wait_for(|s| *s == LinkState::Up),
        )
        .await
        .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::BrokerUnavailable(
                "broker session stopped".to_string(),
            )),
            Err(_) => Err(BridgeError::BrokerUnavailable(format!(
                "reconnect did not complete within {:?}",
                self.reconnect_timeout
            ))),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        BusClient::publish(&self.client, topic, payload).await
    }
}
