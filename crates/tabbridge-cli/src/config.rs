//! Configuration file loading – `tabbridge.json` or `tabbridge.toml`.
//!
//! The file carries the bridge schema at its root plus an optional `server`
//! table with process settings that are never echoed by `/api/config`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabbridge_cockpit::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT};
use tabbridge_middleware::OverflowPolicy;
use tabbridge_middleware::hub::DEFAULT_QUEUE_CAPACITY;
use tabbridge_types::{ConfigError, Configuration};

/// Path used when neither `TABBRIDGE_CONFIG` nor a CLI argument is given.
pub const DEFAULT_CONFIG_PATH: &str = "tabbridge.json";

/// Process settings (`[server]` in TOML, `"server": {}` in JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Per-client event queue depth.
    pub client_queue: usize,
    pub overflow: OverflowPolicy,
    /// Upload staging directory; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// How long an action waits for an on-demand broker reconnect.
    pub reconnect_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            client_queue: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            staging_dir: None,
            reconnect_timeout_secs: 5,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerSettings {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }
}

/// Everything read from the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub bridge: Configuration,
    #[serde(default)]
    pub server: ServerSettings,
}

/// Resolve the configuration path: `TABBRIDGE_CONFIG`, then the first
/// argument, then [`DEFAULT_CONFIG_PATH`].
pub fn config_path(args: &[String]) -> PathBuf {
    std::env::var("TABBRIDGE_CONFIG")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| args.first().cloned())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read and parse the file. `.toml` files are parsed as TOML, anything else
/// as JSON.
pub fn load_from(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse(path, &raw)
}

fn parse(path: &Path, raw: &str) -> Result<FileConfig, ConfigError> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    })
}

/// Apply `TABBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Field |
/// |---|---|
/// | `TABBRIDGE_HTTP_PORT` | `server.port` |
/// | `TABBRIDGE_BROKER_HOST` | `broker.host` |
/// | `TABBRIDGE_BROKER_PORT` | `broker.port` |
/// | `TABBRIDGE_CLIENT_QUEUE` | `server.client_queue` |
///
/// Unparsable numbers leave the field unchanged.
pub fn apply_env_overrides(cfg: &mut FileConfig) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides(cfg: &mut FileConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("TABBRIDGE_HTTP_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.server.port = port;
    }
    if let Some(host) = var("TABBRIDGE_BROKER_HOST") {
        cfg.bridge.broker.host = host;
    }
    if let Some(port) = var("TABBRIDGE_BROKER_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.bridge.broker.port = port;
    }
    if let Some(depth) = var("TABBRIDGE_CLIENT_QUEUE")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|d| *d > 0)
    {
        cfg.server.client_queue = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const JSON: &str = r#"{
        "broker": {"host": "mqtt.local", "port": 1884},
        "tabs": [{"id": "main", "members": [
            {"type": "sensor", "topic": "sensor/temperature"}
        ]}],
        "server": {"port": 9000, "overflow": "drop-oldest"}
    }"#;

    const TOML: &str = r#"
        [broker]
        host = "mqtt.local"

        [[tabs]]
        id = "main"

        [[tabs.members]]
        type = "button"
        button_name = "pump_on"
        publish_topic = "cmd/pump"

        [server]
        client_queue = 8
    "#;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn json_file_with_server_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        fs::write(&path, JSON).unwrap();

        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.bridge.broker.host, "mqtt.local");
        assert_eq!(cfg.bridge.broker.port, 1884);
        assert_eq!(cfg.bridge.sensors().count(), 1);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.overflow, OverflowPolicy::DropOldest);
        assert_eq!(cfg.server.client_queue, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn toml_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.TOML");
        fs::write(&path, TOML).unwrap();

        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.bridge.buttons().next().unwrap().publish_topic, "cmd/pump");
        assert_eq!(cfg.bridge.broker.port, 1883);
        assert_eq!(cfg.server.client_queue, 8);
        assert_eq!(cfg.server.port, DEFAULT_PORT);
    }

    #[test]
    fn missing_server_table_uses_defaults() {
        let cfg = parse(Path::new("x.json"), r#"{"broker":{"host":"h"}}"#).unwrap();
        assert_eq!(cfg.server, ServerSettings::default());
        assert_eq!(cfg.server.reconnect_timeout(), Duration::from_secs(5));
        assert!(cfg.bridge.tabs.is_empty());
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let err = parse(Path::new("bad.json"), "{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = parse(Path::new("bad.toml"), "broker = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = parse(Path::new("x.json"), JSON).unwrap();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("TABBRIDGE_HTTP_PORT", "8181"),
                ("TABBRIDGE_BROKER_HOST", "broker.example"),
                ("TABBRIDGE_BROKER_PORT", "8883"),
                ("TABBRIDGE_CLIENT_QUEUE", "128"),
            ]),
        );
        assert_eq!(cfg.server.port, 8181);
        assert_eq!(cfg.bridge.broker.host, "broker.example");
        assert_eq!(cfg.bridge.broker.port, 8883);
        assert_eq!(cfg.server.client_queue, 128);
    }

    #[test]
    fn overrides_ignore_invalid_numbers() {
        let mut cfg = parse(Path::new("x.json"), JSON).unwrap();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("TABBRIDGE_HTTP_PORT", "not-a-port"),
                ("TABBRIDGE_BROKER_PORT", "70000"),
                ("TABBRIDGE_CLIENT_QUEUE", "0"),
            ]),
        );
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.bridge.broker.port, 1884);
        assert_eq!(cfg.server.client_queue, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn config_path_prefers_first_argument_over_default() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::remove_var("TABBRIDGE_CONFIG") };
        assert_eq!(config_path(&[]), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            config_path(&["site.toml".to_string()]),
            PathBuf::from("site.toml")
        );
    }
}
