//! `tabbridge-types` – shared vocabulary of the bridge.
//!
//! Every other crate speaks in terms of these types:
//!
//! - [`config`] – the declarative schema: [`Configuration`], [`Tab`], and the
//!   four [`Member`] variants.
//! - [`reading`] – [`SensorKind`] and the formatted [`SensorReading`] that is
//!   cached and pushed to real-time clients.
//! - [`error`] – [`ConfigError`] (fatal, startup only) and [`BridgeError`]
//!   (per request, rendered at the HTTP boundary).

pub mod config;
pub mod error;
pub mod reading;

pub use config::{
    BrokerEndpoint, ButtonMember, Configuration, DownloadPolicy, Member, SensorMember, Tab,
    UploadPolicy, file_extension, sensor_key,
};
pub use error::{BridgeError, ConfigError};
pub use reading::{SensorKind, SensorReading};
