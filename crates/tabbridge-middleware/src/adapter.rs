//! Broker-facing seams.
//!
//! The bridge never talks to `rumqttc` directly outside this crate's broker
//! module. Two traits keep the rest testable:
//!
//! - [`BusClient`] – the raw subscribe/publish surface of a broker client.
//!   Implemented for [`rumqttc::AsyncClient`].
//! - [`BusPublisher`] – what the action path needs: link state, one
//!   on-demand reconnect, publish. Implemented by
//!   [`BrokerConnectionManager`][crate::broker::BrokerConnectionManager].

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tabbridge_types::BridgeError;

/// Raw broker client operations.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Queue a subscription. Runs on the event-loop task, so it must not wait
    /// for room in a request channel that only that task drains.
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
}

#[async_trait]
impl BusClient for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| BridgeError::BrokerUnavailable(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BridgeError::BrokerUnavailable(e.to_string()))
    }
}

/// Outbound command path used by the action dispatcher.
///
/// # Contract
///
/// * `is_connected` – current link state, no I/O.
/// * `reconnect` – a single bounded attempt; `Err(BrokerUnavailable)` when
///   the link is still down afterwards.
/// * `publish` – hand the payload to the broker client.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn reconnect(&self) -> Result<(), BridgeError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
}
