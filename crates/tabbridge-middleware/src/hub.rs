//! Fan-out of sensor and system events to connected WebSocket clients.
//!
//! Every client owns a bounded queue, so one slow client never blocks the
//! others or the ingest path. When a queue is full the hub applies the
//! configured [`OverflowPolicy`] to that client only.
//!
//! # Events
//!
//! | Event | Sent when |
//! |---|---|
//! | [`HubEvent::Init`] | Exactly once, first, on connect |
//! | [`HubEvent::SensorUpdate`] | After every cache write |
//! | [`HubEvent::SystemUpdate`] | After every system-metrics request |
//!
//! A client registered by [`BroadcastHub::connect`] sees the cache snapshot
//! followed by every update applied after that snapshot. Registration and
//! snapshot happen under the registry lock, and the pipeline writes the
//! cache before broadcasting, so no update falls between the two.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tabbridge_types::SensorReading;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::SensorCache;

/// Per-client queue depth used by [`BroadcastHub::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

pub type ClientId = Uuid;

/// Server-to-client push message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Init {
        sensors: BTreeMap<String, SensorReading>,
    },
    SensorUpdate {
        sensor: String,
        data: SensorReading,
    },
    SystemUpdate {
        data: serde_json::Value,
    },
}

/// What to do with an event when a client's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Keep the queued backlog, discard the incoming event.
    #[default]
    DropNewest,
    /// Evict the oldest queued update to make room. A pending
    /// [`HubEvent::Init`] is never evicted.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "drop-newest" => Ok(OverflowPolicy::DropNewest),
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-client queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    /// Queued after evicting an older update.
    Evicted,
    /// The incoming event was discarded.
    Dropped,
    Closed,
}

#[derive(Debug)]
struct ClientQueue {
    events: Mutex<VecDeque<Arc<HubEvent>>>,
    ready: Notify,
    closed: AtomicBool,
    capacity: usize,
    policy: OverflowPolicy,
}

impl ClientQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
            policy,
        }
    }

    fn push(&self, event: Arc<HubEvent>) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        let mut events = self.events.lock();
        let mut delivery = Delivery::Queued;
        if events.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropNewest => return Delivery::Dropped,
                OverflowPolicy::DropOldest => {
                    // Init is never evicted; the oldest update behind it goes.
                    let oldest_update = events
                        .iter()
                        .position(|e| !matches!(e.as_ref(), HubEvent::Init { .. }));
                    match oldest_update {
                        Some(index) => {
                            events.remove(index);
                            delivery = Delivery::Evicted;
                        }
                        None => return Delivery::Dropped,
                    }
                }
            }
        }
        events.push_back(event);
        drop(events);
        self.ready.notify_one();
        delivery
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receiving half handed to one connected client.
///
/// Dropping it unregisters the client; the hub prunes it on the next
/// broadcast.
#[derive(Debug)]
pub struct ClientReceiver {
    id: ClientId,
    queue: Arc<ClientQueue>,
}

impl ClientReceiver {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the hub has closed this
    /// client and the backlog is drained.
    pub async fn recv(&mut self) -> Option<Arc<HubEvent>> {
        loop {
            let next = self.queue.events.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.ready.notified().await;
        }
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<HubEvent>> {
        self.queue.events.lock().pop_front()
    }
}

impl Drop for ClientReceiver {
    fn drop(&mut self) {
        self.queue.close();
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Registry of connected clients. Share it behind an `Arc`.
#[derive(Debug)]
pub struct BroadcastHub {
    clients: Mutex<HashMap<ClientId, Arc<ClientQueue>>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl BroadcastHub {
    /// Create a hub whose clients each buffer up to `capacity` events.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Register a client. Its first event is an [`HubEvent::Init`] holding
    /// the cache snapshot taken at registration.
    pub fn connect(&self, cache: &SensorCache) -> ClientReceiver {
        let id = Uuid::new_v4();
        let queue = Arc::new(ClientQueue::new(self.capacity, self.policy));

        let mut clients = self.clients.lock();
        let init = HubEvent::Init {
            sensors: cache.snapshot(),
        };
        queue.push(Arc::new(init));
        clients.insert(id, Arc::clone(&queue));
        let connected = clients.len();
        drop(clients);

        info!(client = %id, connected, "client connected");
        ClientReceiver { id, queue }
    }

    /// Unregister a client and wake its receiver.
    pub fn disconnect(&self, id: ClientId) {
        if let Some(queue) = self.clients.lock().remove(&id) {
            queue.close();
            info!(client = %id, "client disconnected");
        }
    }

    /// Offer `event` to every connected client. Returns how many queued it.
    ///
    /// Closed clients are pruned; overflowing clients lose one event
    /// according to the hub's [`OverflowPolicy`].
    pub fn broadcast(&self, event: HubEvent) -> usize {
        let event = Arc::new(event);
        let mut clients = self.clients.lock();
        let mut queued = 0;
        clients.retain(|id, queue| match queue.push(Arc::clone(&event)) {
            Delivery::Queued => {
                queued += 1;
                true
            }
            Delivery::Evicted => {
                debug!(client = %id, "client queue full; oldest update evicted");
                queued += 1;
                true
            }
            Delivery::Dropped => {
                debug!(client = %id, "client queue full; event dropped");
                true
            }
            Delivery::Closed => {
                debug!(client = %id, "pruning closed client");
                false
            }
        });
        queued
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, OverflowPolicy::default())
    }
}
