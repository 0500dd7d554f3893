use thiserror::Error;

/// Fatal startup errors. Any of these aborts the process before a single
/// request is served.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate button_name: {0}")]
    DuplicateButtonName(String),

    #[error("{member} member '{button_name}' is missing required field `{field}`")]
    MissingField {
        member: &'static str,
        button_name: String,
        field: &'static str,
    },

    #[error("sensor in tab '{tab}' has an empty topic")]
    EmptySensorTopic { tab: String },

    #[error("duplicate sensor topic: {0}")]
    DuplicateSensorTopic(String),

    #[error("sensor key '{key}' is shared by topics '{first}' and '{second}'")]
    DuplicateSensorKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("broker host must not be empty")]
    EmptyBrokerHost,

    #[error("failed to read configuration at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration at {path}: {message}")]
    Parse { path: String, message: String },
}

/// Request-time errors. Rendered as `{success:false, error}` at the handler
/// boundary; none of them terminates the process.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Containment escape. The message is fixed so no path structure leaks.
    #[error("access denied")]
    AccessDenied,

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
