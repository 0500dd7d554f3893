//! [`TopicRegistry`] – topic → decode capability, derived once from config.
//!
//! Each Sensor member becomes a [`SensorBinding`]: its topic, cache key,
//! resolved [`SensorKind`], declared unit and a decoder function picked by
//! an exhaustive match on the kind. Only registered topics are subscribed.
//!
//! Decoding never loses a message: when a decoder fails, the binding returns
//! [`Decoded::Raw`] carrying the original bytes and the error text.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tabbridge_kernel::ValidatedConfig;
use tabbridge_types::{BridgeError, SensorKind};
use tracing::{debug, warn};

/// Schema-aware decode capability for one sensor kind.
pub type DecodeFn = fn(SensorKind, &[u8]) -> Result<Decoded, BridgeError>;

/// Intermediate, kind-specific payload before formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Scalar {
        value: f64,
        unit: Option<String>,
    },
    Position {
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    },
    Status {
        code: Option<i64>,
        label: String,
        /// Authoritative timestamp carried by the payload, if any.
        timestamp: Option<DateTime<Utc>>,
    },
    Text(String),
    Raw {
        bytes: Vec<u8>,
        error: Option<String>,
    },
}

/// Decoder for `kind`. Every kind has one; `Raw` never fails.
pub fn decoder_for(kind: SensorKind) -> DecodeFn {
    match kind {
        SensorKind::Temperature
        | SensorKind::Humidity
        | SensorKind::Pressure
        | SensorKind::Voltage
        | SensorKind::Current
        | SensorKind::Battery => decode_scalar,
        SensorKind::Position => decode_position,
        SensorKind::Status => decode_status,
        SensorKind::Text => decode_text,
        SensorKind::Raw => decode_raw,
    }
}

/// One registered sensor topic.
#[derive(Debug, Clone)]
pub struct SensorBinding {
    pub topic: String,
    pub key: String,
    pub kind: SensorKind,
    /// Unit declared in configuration; highest precedence.
    pub unit: Option<String>,
    decoder: DecodeFn,
}

impl SensorBinding {
    pub fn new(topic: &str, key: &str, kind: SensorKind, unit: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            key: key.to_string(),
            kind,
            unit,
            decoder: decoder_for(kind),
        }
    }

    /// Decode `payload`, downgrading failures to a raw passthrough.
    pub fn decode(&self, payload: &[u8]) -> Decoded {
        match (self.decoder)(self.kind, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    kind = %self.kind,
                    error = %e,
                    "decode failed; passing raw payload through"
                );
                Decoded::Raw {
                    bytes: payload.to_vec(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Registered sensor topics and their bindings.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    bindings: HashMap<String, SensorBinding>,
    topics: Vec<String>,
}

impl TopicRegistry {
    /// Register every Sensor member of a validated configuration.
    pub fn from_config(config: &ValidatedConfig) -> Self {
        let mut registry = Self::default();
        for topic in config.sensor_topics() {
            if let Some(sensor) = config.sensor(topic) {
                let kind = SensorKind::resolve(sensor.kind.as_deref(), sensor.key());
                registry.register(SensorBinding::new(
                    &sensor.topic,
                    sensor.key(),
                    kind,
                    sensor.unit.clone(),
                ));
            }
        }
        registry
    }

    /// Add a binding. A topic registered twice keeps the first binding.
    pub fn register(&mut self, binding: SensorBinding) {
        if self.bindings.contains_key(&binding.topic) {
            return;
        }
        debug!(topic = %binding.topic, kind = %binding.kind, "sensor topic registered");
        self.topics.push(binding.topic.clone());
        self.bindings.insert(binding.topic.clone(), binding);
    }

    /// The exact subscription set, in registration order.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn lookup(&self, topic: &str) -> Option<&SensorBinding> {
        self.bindings.get(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

fn decode_scalar(kind: SensorKind, payload: &[u8]) -> Result<Decoded, BridgeError> {
    let text = utf8(payload)?.trim();
    if let Ok(value) = text.parse::<f64>() {
        return Ok(Decoded::Scalar {
            value: finite(value)?,
            unit: None,
        });
    }

    match parse_json(text)? {
        Value::Number(n) => Ok(Decoded::Scalar {
            value: finite(n.as_f64().unwrap_or(f64::NAN))?,
            unit: None,
        }),
        Value::Object(map) => {
            let value = map
                .get(kind.name())
                .or_else(|| map.get("value"))
                .and_then(number)
                .ok_or_else(|| {
                    BridgeError::Decode(format!("no numeric `{}` or `value` field", kind.name()))
                })?;
            Ok(Decoded::Scalar {
                value: finite(value)?,
                unit: map.get("unit").and_then(Value::as_str).map(str::to_string),
            })
        }
        other => Err(BridgeError::Decode(format!(
            "expected a number, got {}",
            json_type(&other)
        ))),
    }
}

fn decode_position(_kind: SensorKind, payload: &[u8]) -> Result<Decoded, BridgeError> {
    let text = utf8(payload)?.trim();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        let latitude = field(&map, &["latitude", "lat"])
            .ok_or_else(|| BridgeError::Decode("missing latitude".to_string()))?;
        let longitude = field(&map, &["longitude", "lon", "lng"])
            .ok_or_else(|| BridgeError::Decode("missing longitude".to_string()))?;
        return Ok(Decoded::Position {
            latitude: finite(latitude)?,
            longitude: finite(longitude)?,
            altitude: field(&map, &["altitude", "alt"]),
        });
    }

    // "lat,lon" text form.
    let mut parts = text.split(',').map(str::trim);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(lat), Some(lon), None) => {
            let latitude = lat
                .parse::<f64>()
                .map_err(|e| BridgeError::Decode(format!("latitude: {e}")))?;
            let longitude = lon
                .parse::<f64>()
                .map_err(|e| BridgeError::Decode(format!("longitude: {e}")))?;
            Ok(Decoded::Position {
                latitude: finite(latitude)?,
                longitude: finite(longitude)?,
                altitude: None,
            })
        }
        _ => Err(BridgeError::Decode(
            "expected a position object or \"lat,lon\"".to_string(),
        )),
    }
}

fn decode_status(_kind: SensorKind, payload: &[u8]) -> Result<Decoded, BridgeError> {
    let text = utf8(payload)?.trim();
    if let Ok(code) = text.parse::<i64>() {
        return Ok(status_from_code(code, None));
    }

    match parse_json(text)? {
        Value::Number(n) => n
            .as_i64()
            .map(|code| status_from_code(code, None))
            .ok_or_else(|| BridgeError::Decode("status code must be an integer".to_string())),
        Value::String(label) => Ok(status_from_label(&label, None)),
        Value::Object(map) => {
            let timestamp = map.get("timestamp").map(parse_timestamp).transpose()?;
            match map.get("code").or_else(|| map.get("status")) {
                Some(Value::Number(n)) => n
                    .as_i64()
                    .map(|code| status_from_code(code, timestamp))
                    .ok_or_else(|| {
                        BridgeError::Decode("status code must be an integer".to_string())
                    }),
                Some(Value::String(label)) => Ok(status_from_label(label, timestamp)),
                _ => Err(BridgeError::Decode("missing `code` or `status` field".to_string())),
            }
        }
        other => Err(BridgeError::Decode(format!(
            "expected a status, got {}",
            json_type(&other)
        ))),
    }
}

fn decode_text(_kind: SensorKind, payload: &[u8]) -> Result<Decoded, BridgeError> {
    Ok(Decoded::Text(utf8(payload)?.to_string()))
}

fn decode_raw(_kind: SensorKind, payload: &[u8]) -> Result<Decoded, BridgeError> {
    Ok(Decoded::Raw {
        bytes: payload.to_vec(),
        error: None,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Label for a numeric status code.
pub fn status_label(code: i64) -> &'static str {
    match code {
        0 => "OK",
        1 => "WARNING",
        2 => "ERROR",
        3 => "OFFLINE",
        _ => "UNKNOWN",
    }
}

fn status_from_code(code: i64, timestamp: Option<DateTime<Utc>>) -> Decoded {
    Decoded::Status {
        code: Some(code),
        label: status_label(code).to_string(),
        timestamp,
    }
}

fn status_from_label(label: &str, timestamp: Option<DateTime<Utc>>) -> Decoded {
    Decoded::Status {
        code: None,
        label: label.trim().to_ascii_uppercase(),
        timestamp,
    }
}

/// RFC 3339 string or epoch seconds.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, BridgeError> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| BridgeError::Decode(format!("timestamp: {e}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| BridgeError::Decode("timestamp out of range".to_string())),
        other => Err(BridgeError::Decode(format!(
            "timestamp must be a string or number, got {}",
            json_type(other)
        ))),
    }
}

fn utf8(payload: &[u8]) -> Result<&str, BridgeError> {
    std::str::from_utf8(payload).map_err(|e| BridgeError::Decode(format!("invalid UTF-8: {e}")))
}

fn parse_json(text: &str) -> Result<Value, BridgeError> {
    serde_json::from_str(text).map_err(|e| BridgeError::Decode(format!("invalid payload: {e}")))
}

fn finite(value: f64) -> Result<f64, BridgeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(BridgeError::Decode("non-finite value".to_string()))
    }
}

// Numbers, or numeric strings.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field(map: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| map.get(*name).and_then(number))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabbridge_kernel::ConfigValidator;
    use tabbridge_types::Configuration;

    fn binding(kind: SensorKind) -> SensorBinding {
        SensorBinding::new("sensor/x", "x", kind, None)
    }

    #[test]
    fn scalar_accepts_bare_number_text() {
        assert_eq!(
            binding(SensorKind::Temperature).decode(b" 21.5\n"),
            Decoded::Scalar { value: 21.5, unit: None }
        );
    }

    #[test]
    fn scalar_reads_kind_field_then_value_field() {
        let b = binding(SensorKind::Humidity);
        assert_eq!(
            b.decode(br#"{"humidity": 40, "unit": "%RH"}"#),
            Decoded::Scalar { value: 40.0, unit: Some("%RH".into()) }
        );
        assert_eq!(
            b.decode(br#"{"value": "41.5"}"#),
            Decoded::Scalar { value: 41.5, unit: None }
        );
    }

    #[test]
    fn decode_failure_keeps_original_bytes_and_error() {
        let decoded = binding(SensorKind::Pressure).decode(b"not a number");
        match decoded {
            Decoded::Raw { bytes, error } => {
                assert_eq!(bytes, b"not a number");
                assert!(error.unwrap().contains("invalid payload"));
            }
            other => panic!("expected raw passthrough, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_falls_back_to_raw() {
        let decoded = binding(SensorKind::Text).decode(&[0xff, 0xfe, 0x00]);
        assert!(matches!(decoded, Decoded::Raw { error: Some(_), .. }));
    }

    #[test]
    fn position_accepts_object_and_text() {
        let b = binding(SensorKind::Position);
        assert_eq!(
            b.decode(br#"{"lat": 52.37, "lon": 4.89, "alt": 2.0}"#),
            Decoded::Position { latitude: 52.37, longitude: 4.89, altitude: Some(2.0) }
        );
        assert_eq!(
            b.decode(b"52.37, 4.89"),
            Decoded::Position { latitude: 52.37, longitude: 4.89, altitude: None }
        );
    }

    #[test]
    fn status_uses_payload_timestamp() {
        let decoded = binding(SensorKind::Status)
            .decode(br#"{"code": 2, "timestamp": "2024-05-01T12:00:00Z"}"#);
        match decoded {
            Decoded::Status { code, label, timestamp } => {
                assert_eq!(code, Some(2));
                assert_eq!(label, "ERROR");
                assert_eq!(timestamp.unwrap().to_rfc3339(), "2024-05-01T12:00:00+00:00");
            }
            other => panic!("expected status, got {other:?}"),
        }
        assert!(matches!(
            binding(SensorKind::Status).decode(b"\"degraded\""),
            Decoded::Status { code: None, ref label, .. } if label == "DEGRADED"
        ));
    }

    #[test]
    fn raw_kind_never_fails() {
        assert_eq!(
            binding(SensorKind::Raw).decode(&[1, 2, 3]),
            Decoded::Raw { bytes: vec![1, 2, 3], error: None }
        );
    }

    #[test]
    fn registry_covers_exactly_the_configured_sensor_topics() {
        let cfg: Configuration = serde_json::from_str(
            r#"{"broker": {"host": "h"}, "tabs": [
                {"id": "a", "members": [
                    {"type": "sensor", "topic": "sensor/temperature", "unit": "°C"},
                    {"type": "button", "button_name": "b", "publish_topic": "cmd/b"}
                ]},
                {"id": "b", "members": [
                    {"type": "sensor", "topic": "plant/gps", "kind": "position"},
                    {"type": "sensor", "topic": "plant/widget"}
                ]}
            ]}"#,
        )
        .unwrap();
        let registry = TopicRegistry::from_config(&ConfigValidator::validate(cfg).unwrap());

        assert_eq!(registry.topics(), ["sensor/temperature", "plant/gps", "plant/widget"]);
        assert_eq!(registry.lookup("sensor/temperature").unwrap().kind, SensorKind::Temperature);
        assert_eq!(registry.lookup("plant/gps").unwrap().kind, SensorKind::Position);
        assert_eq!(registry.lookup("plant/widget").unwrap().kind, SensorKind::Raw);
        assert!(registry.lookup("cmd/b").is_none());
    }
}
