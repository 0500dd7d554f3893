//! Sensor kinds and the formatted reading shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of sensor kinds with a schema-aware decoder each.
///
/// Unknown names never produce an absent entry: they resolve to
/// [`SensorKind::Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Voltage,
    Current,
    Battery,
    Position,
    Status,
    Text,
    Raw,
}

impl SensorKind {
    /// Case-insensitive lookup. Unknown names map to [`SensorKind::Raw`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => SensorKind::Temperature,
            "humidity" => SensorKind::Humidity,
            "pressure" => SensorKind::Pressure,
            "voltage" => SensorKind::Voltage,
            "current" => SensorKind::Current,
            "battery" => SensorKind::Battery,
            "position" | "gps" | "location" => SensorKind::Position,
            "status" | "state" => SensorKind::Status,
            "text" | "string" => SensorKind::Text,
            _ => SensorKind::Raw,
        }
    }

    /// Declared kind wins; otherwise the sensor key (last topic segment) is
    /// used as the kind name.
    pub fn resolve(declared: Option<&str>, key: &str) -> Self {
        match declared {
            Some(name) => Self::from_name(name),
            None => Self::from_name(key),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
            SensorKind::Voltage => "voltage",
            SensorKind::Current => "current",
            SensorKind::Battery => "battery",
            SensorKind::Position => "position",
            SensorKind::Status => "status",
            SensorKind::Text => "text",
            SensorKind::Raw => "raw",
        }
    }

    /// Fallback unit when neither config nor payload provides one.
    pub fn default_unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity | SensorKind::Battery => "%",
            SensorKind::Pressure => "hPa",
            SensorKind::Voltage => "V",
            SensorKind::Current => "A",
            SensorKind::Position | SensorKind::Status | SensorKind::Text | SensorKind::Raw => "",
        }
    }

    /// Kinds whose reading is a single number.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            SensorKind::Temperature
                | SensorKind::Humidity
                | SensorKind::Pressure
                | SensorKind::Voltage
                | SensorKind::Current
                | SensorKind::Battery
        )
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Latest formatted value for one sensor key. Never historized.
///
/// Type-specific fields (`latitude`, `code`, `encoding`, `error`, …) are
/// flattened next to `value`, `unit` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: Value,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SensorReading {
    pub fn new(value: impl Into<Value>, unit: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            unit: unit.into(),
            timestamp,
            extra: Map::new(),
        }
    }

    /// Attach a type-specific field (builder-style).
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_resolves_to_raw() {
        assert_eq!(SensorKind::from_name("flux-capacitor"), SensorKind::Raw);
        assert_eq!(SensorKind::resolve(None, "mystery"), SensorKind::Raw);
    }

    #[test]
    fn declared_kind_overrides_topic_key() {
        assert_eq!(SensorKind::resolve(Some("status"), "temperature"), SensorKind::Status);
        assert_eq!(SensorKind::resolve(None, "Temperature"), SensorKind::Temperature);
    }

    #[test]
    fn reading_flattens_extra_fields() {
        let ts = Utc::now();
        let reading = SensorReading::new("52.1, 4.3", "", ts)
            .with_field("latitude", 52.1)
            .with_field("longitude", 4.3);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["latitude"], 52.1);
        assert_eq!(json["value"], "52.1, 4.3");
        assert!(json.get("extra").is_none());
    }
}
