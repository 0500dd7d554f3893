//! Inbound telemetry path: broker message → decode → format → cache → hub.

use std::sync::Arc;

use chrono::Utc;
use tabbridge_types::SensorReading;
use tracing::{debug, trace};

use crate::cache::SensorCache;
use crate::decode::TopicRegistry;
use crate::formatter;
use crate::hub::{BroadcastHub, HubEvent};

/// Sole writer of the [`SensorCache`].
pub struct TelemetryPipeline {
    registry: TopicRegistry,
    cache: Arc<SensorCache>,
    hub: Arc<BroadcastHub>,
}

impl TelemetryPipeline {
    pub fn new(registry: TopicRegistry, cache: Arc<SensorCache>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            registry,
            cache,
            hub,
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<SensorCache> {
        &self.cache
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Process one broker message.
    ///
    /// Messages on unregistered topics are ignored and return `None`. A
    /// payload that fails to decode still produces a (raw) reading.
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> Option<SensorReading> {
        let Some(binding) = self.registry.lookup(topic) else {
            debug!(topic, "message on unconfigured topic ignored");
            return None;
        };

        let decoded = binding.decode(payload);
        let reading = formatter::format(binding, decoded, Utc::now());

        // Cache first: a client connecting between these two steps gets the
        // new value in its snapshot and may see it once more as an update.
        self.cache.insert(&binding.key, reading.clone());
        let delivered = self.hub.broadcast(HubEvent::SensorUpdate {
            sensor: binding.key.clone(),
            data: reading.clone(),
        });
        trace!(topic, sensor = %binding.key, delivered, "sensor reading ingested");

        Some(reading)
    }
}
