//! The declarative bridge schema.
//!
//! ```text
//! { broker: {host, port},
//!   tabs: [ { id, members: [
//!      {type: "sensor", topic, unit?},
//!      {type: "button", button_name, publish_topic},
//!      {type: "upload", button_name, upload_directory, allowed_extensions[], max_file_size?},
//!      {type: "download", button_name, root_directory, allowed_extensions[]}
//!   ]}]}
//! ```
//!
//! Required-but-empty fields deserialize to empty values so that the
//! validator, not the parser, reports which member is incomplete.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Root of the schema. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub broker: BrokerEndpoint,
    #[serde(default)]
    pub tabs: Vec<Tab>,
}

impl Configuration {
    /// Every member of every tab, in declaration order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.tabs.iter().flat_map(|tab| tab.members.iter())
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorMember> {
        self.members().filter_map(|m| match m {
            Member::Sensor(s) => Some(s),
            _ => None,
        })
    }

    pub fn buttons(&self) -> impl Iterator<Item = &ButtonMember> {
        self.members().filter_map(|m| match m {
            Member::Button(b) => Some(b),
            _ => None,
        })
    }

    pub fn uploads(&self) -> impl Iterator<Item = &UploadPolicy> {
        self.members().filter_map(|m| match m {
            Member::Upload(u) => Some(u),
            _ => None,
        })
    }

    pub fn downloads(&self) -> impl Iterator<Item = &DownloadPolicy> {
        self.members().filter_map(|m| match m {
            Member::Download(d) => Some(d),
            _ => None,
        })
    }
}

/// Bus endpoint. `password` is accepted on input but never serialized back
/// out, so `/api/config` cannot leak it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl std::fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

/// A named grouping of members. Organizational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// One configured unit of behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Member {
    Sensor(SensorMember),
    Button(ButtonMember),
    Upload(UploadPolicy),
    Download(DownloadPolicy),
}

impl Member {
    /// The global `button_name`, for the three variants that carry one.
    pub fn button_name(&self) -> Option<&str> {
        match self {
            Member::Sensor(_) => None,
            Member::Button(b) => Some(&b.button_name),
            Member::Upload(u) => Some(&u.button_name),
            Member::Download(d) => Some(&d.button_name),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Member::Sensor(_) => "sensor",
            Member::Button(_) => "button",
            Member::Upload(_) => "upload",
            Member::Download(_) => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMember {
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Explicit sensor kind; inferred from the topic when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SensorMember {
    /// Cache key: the last path segment of the topic.
    pub fn key(&self) -> &str {
        sensor_key(&self.topic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonMember {
    pub button_name: String,
    #[serde(default)]
    pub publish_topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub button_name: String,
    #[serde(default)]
    pub upload_directory: String,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Size limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

impl UploadPolicy {
    pub fn allows(&self, file_name: &str) -> bool {
        extension_allowed(&self.allowed_extensions, file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPolicy {
    pub button_name: String,
    #[serde(default)]
    pub root_directory: String,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

impl DownloadPolicy {
    pub fn allows(&self, file_name: &str) -> bool {
        extension_allowed(&self.allowed_extensions, file_name)
    }
}

/// Last path segment of a topic (`"sensor/temperature"` → `"temperature"`).
/// A trailing separator is ignored.
pub fn sensor_key(topic: &str) -> &str {
    topic
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Extension of `file_name` including its leading dot, e.g. `".csv"`.
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

// Exact, case-sensitive membership.
fn extension_allowed(allowed: &[String], file_name: &str) -> bool {
    match file_extension(file_name) {
        Some(ext) => allowed.iter().any(|a| *a == ext),
        None => false,
    }
}
