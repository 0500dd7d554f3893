//! Shapes a [`Decoded`] payload into the client-facing [`SensorReading`].
//!
//! Unit precedence is: configured unit, then the unit carried by the payload,
//! then the kind's default. Timestamps are the receive time unless the
//! payload carries an authoritative one (status payloads).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tabbridge_types::SensorReading;

use crate::decode::{Decoded, SensorBinding};

pub fn format(
    binding: &SensorBinding,
    decoded: Decoded,
    received_at: DateTime<Utc>,
) -> SensorReading {
    match decoded {
        Decoded::Scalar { value, unit } => {
            SensorReading::new(value, resolve_unit(binding, unit.as_deref()), received_at)
        }
        Decoded::Position {
            latitude,
            longitude,
            altitude,
        } => {
            let reading = SensorReading::new(
                format!("{latitude}, {longitude}"),
                resolve_unit(binding, None),
                received_at,
            )
            .with_field("latitude", latitude)
            .with_field("longitude", longitude);
            match altitude {
                Some(alt) => reading.with_field("altitude", alt),
                None => reading,
            }
        }
        Decoded::Status {
            code,
            label,
            timestamp,
        } => {
            let reading = SensorReading::new(
                label,
                resolve_unit(binding, None),
                timestamp.unwrap_or(received_at),
            );
            match code {
                Some(code) => reading.with_field("code", code),
                None => reading,
            }
        }
        Decoded::Text(text) => SensorReading::new(text, resolve_unit(binding, None), received_at),
        Decoded::Raw { bytes, error } => {
            let reading = SensorReading::new(
                STANDARD.encode(&bytes),
                resolve_unit(binding, None),
                received_at,
            )
            .with_field("encoding", "base64");
            match error {
                Some(error) => reading.with_field("error", error),
                None => reading,
            }
        }
    }
}

fn resolve_unit(binding: &SensorBinding, payload_unit: Option<&str>) -> String {
    binding
        .unit
        .as_deref()
        .or(payload_unit)
        .unwrap_or_else(|| binding.kind.default_unit())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabbridge_types::SensorKind;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn configured_unit_beats_payload_and_default() {
        let configured =
            SensorBinding::new("t", "temperature", SensorKind::Temperature, Some("K".into()));
        let unconfigured = SensorBinding::new("t", "temperature", SensorKind::Temperature, None);
        let decoded = Decoded::Scalar { value: 21.5, unit: Some("°F".into()) };

        assert_eq!(format(&configured, decoded.clone(), now()).unit, "K");
        assert_eq!(format(&unconfigured, decoded, now()).unit, "°F");
        assert_eq!(
            format(&unconfigured, Decoded::Scalar { value: 1.0, unit: None }, now()).unit,
            "°C"
        );
    }

    #[test]
    fn scalar_value_is_a_json_number() {
        let b = SensorBinding::new(
            "sensor/temperature",
            "temperature",
            SensorKind::Temperature,
            Some("°C".into()),
        );
        let reading = format(&b, Decoded::Scalar { value: 21.5, unit: None }, now());
        assert_eq!(reading.value, json!(21.5));
    }

    #[test]
    fn position_carries_coordinates() {
        let b = SensorBinding::new("p", "gps", SensorKind::Position, None);
        let reading = format(
            &b,
            Decoded::Position { latitude: 52.5, longitude: 4.25, altitude: None },
            now(),
        );
        assert_eq!(reading.value, json!("52.5, 4.25"));
        assert_eq!(reading.extra["latitude"], json!(52.5));
        assert!(!reading.extra.contains_key("altitude"));
    }

    #[test]
    fn status_prefers_payload_timestamp() {
        let b = SensorBinding::new("s", "status", SensorKind::Status, None);
        let ts: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let reading = format(
            &b,
            Decoded::Status { code: Some(3), label: "OFFLINE".into(), timestamp: Some(ts) },
            now(),
        );
        assert_eq!(reading.timestamp, ts);
        assert_eq!(reading.value, json!("OFFLINE"));
        assert_eq!(reading.extra["code"], json!(3));
    }

    #[test]
    fn raw_is_base64_with_error_annotation() {
        let b = SensorBinding::new("r", "blob", SensorKind::Raw, None);
        let reading = format(
            &b,
            Decoded::Raw { bytes: b"hi".to_vec(), error: Some("bad".into()) },
            now(),
        );
        assert_eq!(reading.value, json!("aGk="));
        assert_eq!(reading.extra["encoding"], json!("base64"));
        assert_eq!(reading.extra["error"], json!("bad"));
    }
}
