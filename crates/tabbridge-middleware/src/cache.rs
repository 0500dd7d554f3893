//! Latest-value store keyed by sensor key.
//!
//! Written only by the telemetry pipeline; read by HTTP handlers and by the
//! hub when a client connects. No history is kept.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tabbridge_types::SensorReading;

#[derive(Debug, Default)]
pub struct SensorCache {
    readings: RwLock<BTreeMap<String, SensorReading>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reading for `key`. Last write wins.
    pub(crate) fn insert(&self, key: &str, reading: SensorReading) {
        self.readings.write().insert(key.to_string(), reading);
    }

    pub fn get(&self, key: &str) -> Option<SensorReading> {
        self.readings.read().get(key).cloned()
    }

    /// Consistent copy of every cached reading.
    pub fn snapshot(&self) -> BTreeMap<String, SensorReading> {
        self.readings.read().clone()
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.read().is_empty()
    }
}
