//! [`ConfigValidator`] – fail-fast structural and uniqueness checks.
//!
//! Checks run in a fixed order and the first violation aborts startup:
//!
//! 1. `button_name` is unique across every Button/Upload/Download member.
//! 2. Upload members carry `upload_directory` and `allowed_extensions`.
//! 3. Download members carry `root_directory` and `allowed_extensions`.
//! 4. Button members carry `publish_topic`.
//! 5. Sensor topics are non-empty, unique, and map to unique cache keys.
//! 6. The broker host is non-empty.
//!
//! On success the configuration is frozen inside a [`ValidatedConfig`] that
//! also carries the two derived indices (button_name → member, topic →
//! sensor) used by every other component.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tabbridge_types::{
    ButtonMember, ConfigError, Configuration, DownloadPolicy, Member, SensorMember, UploadPolicy,
};
use tracing::info;

type Check = fn(&Configuration) -> Result<(), ConfigError>;

/// Evaluated in order; the first failure wins.
const CHECKS: &[Check] = &[
    check_unique_button_names,
    check_upload_members,
    check_download_members,
    check_button_members,
    check_sensor_topics,
    check_broker,
];

/// Stateless validator. See the module docs for the check order.
///
/// # Example
///
/// ```
/// use tabbridge_kernel::ConfigValidator;
/// use tabbridge_types::Configuration;
///
/// let cfg: Configuration = serde_json::from_str(r#"{
///     "broker": {"host": "localhost", "port": 1883},
///     "tabs": [{"id": "t", "members": [
///         {"type": "upload", "button_name": "logs", "upload_directory": "/a", "allowed_extensions": [".txt"]},
///         {"type": "upload", "button_name": "logs", "upload_directory": "/b", "allowed_extensions": [".txt"]}
///     ]}]
/// }"#).unwrap();
///
/// let err = ConfigValidator::validate(cfg).unwrap_err();
/// assert_eq!(err.to_string(), "duplicate button_name: logs");
/// ```
pub struct ConfigValidator;

impl ConfigValidator {
    /// Run every check and, on success, build the derived indices.
    pub fn validate(config: Configuration) -> Result<ValidatedConfig, ConfigError> {
        for check in CHECKS {
            check(&config)?;
        }

        let mut members = HashMap::new();
        let mut sensors = HashMap::new();
        let mut sensor_topics = Vec::new();
        for member in config.members() {
            match member {
                Member::Sensor(sensor) => {
                    sensor_topics.push(sensor.topic.clone());
                    sensors.insert(sensor.topic.clone(), sensor.clone());
                }
                Member::Button(_) | Member::Upload(_) | Member::Download(_) => {
                    if let Some(name) = member.button_name() {
                        members.insert(name.to_string(), member.clone());
                    }
                }
            }
        }

        info!(
            tabs = config.tabs.len(),
            sensors = sensors.len(),
            named_members = members.len(),
            "configuration validated"
        );

        Ok(ValidatedConfig {
            config,
            members,
            sensors,
            sensor_topics,
        })
    }
}

/// A configuration that passed every check, plus its lookup indices.
/// Read-only for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: Configuration,
    members: HashMap<String, Member>,
    sensors: HashMap<String, SensorMember>,
    sensor_topics: Vec<String>,
}

impl ValidatedConfig {
    /// The configuration exactly as validated.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Button/Upload/Download member registered under `button_name`.
    pub fn member(&self, button_name: &str) -> Option<&Member> {
        self.members.get(button_name)
    }

    pub fn button(&self, button_name: &str) -> Option<&ButtonMember> {
        match self.member(button_name)? {
            Member::Button(b) => Some(b),
            _ => None,
        }
    }

    pub fn upload(&self, button_name: &str) -> Option<&UploadPolicy> {
        match self.member(button_name)? {
            Member::Upload(u) => Some(u),
            _ => None,
        }
    }

    pub fn download(&self, button_name: &str) -> Option<&DownloadPolicy> {
        match self.member(button_name)? {
            Member::Download(d) => Some(d),
            _ => None,
        }
    }

    /// Sensor member subscribed on `topic`.
    pub fn sensor(&self, topic: &str) -> Option<&SensorMember> {
        self.sensors.get(topic)
    }

    /// Sensor topics in declaration order.
    pub fn sensor_topics(&self) -> &[String] {
        &self.sensor_topics
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn check_unique_button_names(config: &Configuration) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for name in config.members().filter_map(Member::button_name) {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateButtonName(name.to_string()));
        }
    }
    Ok(())
}

fn check_upload_members(config: &Configuration) -> Result<(), ConfigError> {
    for upload in config.uploads() {
        if upload.upload_directory.trim().is_empty() {
            return Err(missing("upload", &upload.button_name, "upload_directory"));
        }
        if upload.allowed_extensions.is_empty() {
            return Err(missing("upload", &upload.button_name, "allowed_extensions"));
        }
    }
    Ok(())
}

fn check_download_members(config: &Configuration) -> Result<(), ConfigError> {
    for download in config.downloads() {
        if download.root_directory.trim().is_empty() {
            return Err(missing("download", &download.button_name, "root_directory"));
        }
        if download.allowed_extensions.is_empty() {
            return Err(missing("download", &download.button_name, "allowed_extensions"));
        }
    }
    Ok(())
}

fn check_button_members(config: &Configuration) -> Result<(), ConfigError> {
    for button in config.buttons() {
        if button.publish_topic.trim().is_empty() {
            return Err(missing("button", &button.button_name, "publish_topic"));
        }
    }
    Ok(())
}

fn check_sensor_topics(config: &Configuration) -> Result<(), ConfigError> {
    let mut topics = std::collections::HashSet::new();
    let mut keys: HashMap<&str, &str> = HashMap::new();
    for tab in &config.tabs {
        for member in &tab.members {
            let Member::Sensor(sensor) = member else {
                continue;
            };
            if sensor.topic.trim().is_empty() || sensor.key().is_empty() {
                return Err(ConfigError::EmptySensorTopic { tab: tab.id.clone() });
            }
            if !topics.insert(sensor.topic.as_str()) {
                return Err(ConfigError::DuplicateSensorTopic(sensor.topic.clone()));
            }
            match keys.entry(sensor.key()) {
                Entry::Occupied(first) => {
                    return Err(ConfigError::DuplicateSensorKey {
                        key: sensor.key().to_string(),
                        first: first.get().to_string(),
                        second: sensor.topic.clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(sensor.topic.as_str());
                }
            }
        }
    }
    Ok(())
}

fn check_broker(config: &Configuration) -> Result<(), ConfigError> {
    if config.broker.host.trim().is_empty() {
        return Err(ConfigError::EmptyBrokerHost);
    }
    Ok(())
}

fn missing(member: &'static str, button_name: &str, field: &'static str) -> ConfigError {
    ConfigError::MissingField {
        member,
        button_name: button_name.to_string(),
        field,
    }
}
