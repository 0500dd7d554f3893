//! Button actions → broker publishes.
//!
//! An action id resolves only against Button members. When the link is down
//! the dispatcher makes exactly one reconnect attempt; if that fails the
//! action fails with `BrokerUnavailable` instead of blocking the caller.

use std::sync::Arc;

use serde_json::Value;
use tabbridge_kernel::ValidatedConfig;
use tabbridge_types::BridgeError;
use tracing::{info, warn};

use crate::adapter::BusPublisher;

pub struct ActionDispatcher {
    config: Arc<ValidatedConfig>,
    publisher: Arc<dyn BusPublisher>,
}

impl ActionDispatcher {
    pub fn new(config: Arc<ValidatedConfig>, publisher: Arc<dyn BusPublisher>) -> Self {
        Self { config, publisher }
    }

    /// Publish `value` to the button's `publish_topic`. Returns the topic.
    pub async fn dispatch(
        &self,
        action: &str,
        value: Option<&Value>,
    ) -> Result<String, BridgeError> {
        let button = self
            .config
            .button(action)
            .ok_or_else(|| BridgeError::NotFound("action not found".to_string()))?;
        let payload = encode_payload(value);

        if !self.publisher.is_connected() {
            warn!(action, "broker link down; attempting reconnect");
            self.publisher.reconnect().await?;
        }

        self.publisher
            .publish(&button.publish_topic, payload)
            .await?;
        info!(action, topic = %button.publish_topic, "action published");
        Ok(button.publish_topic.clone())
    }
}

/// Strings go out verbatim, `null`/absent as an empty payload, anything else
/// as compact JSON.
pub fn encode_payload(value: Option<&Value>) -> Vec<u8> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.as_bytes().to_vec(),
        Some(other) => other.to_string().into_bytes(),
    }
}
