//! `tabbridge-middleware` – the broker side of the bridge.
//!
//! Moves data between the message bus and connected clients without knowing
//! anything about HTTP.
//!
//! # Modules
//!
//! - [`decode`] – [`TopicRegistry`] and the per-kind payload decoders.
//! - [`formatter`] – decoded payload → client-facing reading.
//! - [`cache`] – latest reading per sensor key.
//! - [`hub`] – per-client bounded fan-out of push events.
//! - [`pipeline`] – broker message → decode → format → cache → hub.
//! - [`adapter`] – [`BusClient`] / [`BusPublisher`] seams over `rumqttc`.
//! - [`broker`] – session lifecycle, resubscription, on-demand reconnect.
//! - [`dispatcher`] – button actions → broker publishes.

pub mod adapter;
pub mod broker;
pub mod cache;
pub mod decode;
pub mod dispatcher;
pub mod formatter;
pub mod hub;
pub mod pipeline;

pub use adapter::{BusClient, BusPublisher};
pub use broker::{BrokerConnectionManager, BrokerOptions, LinkState};
pub use cache::SensorCache;
pub use decode::{Decoded, SensorBinding, TopicRegistry};
pub use dispatcher::ActionDispatcher;
pub use hub::{BroadcastHub, ClientReceiver, HubEvent, OverflowPolicy};
pub use pipeline::TelemetryPipeline;
