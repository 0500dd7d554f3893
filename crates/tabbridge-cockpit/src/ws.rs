//! `/ws` – real-time channel.
//!
//! Downstream: the client's hub queue, starting with `init`, serialized as
//! JSON text frames. Upstream: `{"type":"action", "action", "value"}` frames
//! are dispatched like `POST /api/action` and answered to this client only
//! with an `action_result`. Anything else is ignored.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tabbridge_middleware::ActionDispatcher;
use tracing::{debug, warn};

use crate::api::{ActionRequest, run_action};
use crate::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut events = state.hub.connect(&state.cache);
    let client = events.id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Hub → client
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(event.as_ref()) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(client = %client, error = %e, "event serialization failed"),
                }
            }
            // Client → bridge
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_upstream_message(text.as_str(), &state.dispatcher).await;
                        if let Some(reply) = reply
                            && ws_tx.send(Message::Text(reply.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(client = %client, error = %e, "websocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(client);
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Upstream {
    Action {
        action: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

/// Handle one upstream text frame. Returns the reply for this client, if any.
pub(crate) async fn handle_upstream_message(
    text: &str,
    dispatcher: &ActionDispatcher,
) -> Option<String> {
    let Ok(Upstream::Action { action, value }) = serde_json::from_str::<Upstream>(text) else {
        debug!("ignoring upstream frame");
        return None;
    };

    let (_, outcome) = run_action(dispatcher, &ActionRequest { action, value }).await;
    Some(
        json!({
            "type": "action_result",
            "ack": outcome.ack,
            "success": outcome.success,
            "error": outcome.error,
        })
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn upstream_action_is_dispatched_and_acknowledged() {
        let fx = Fixture::new();
        let reply = handle_upstream_message(
            r#"{"type":"action","action":"pump_on","value":"fast"}"#,
            &fx.state.dispatcher,
        )
        .await
        .unwrap();

        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "action_result");
        assert_eq!(reply["ack"], "pump_on");
        assert_eq!(reply["success"], true);
        assert_eq!(fx.publisher.published(), vec![("cmd/pump".to_string(), b"fast".to_vec())]);
    }

    #[tokio::test]
    async fn upstream_unknown_action_reports_failure() {
        let fx = Fixture::new();
        let reply = handle_upstream_message(
            r#"{"type":"action","action":"nope"}"#,
            &fx.state.dispatcher,
        )
        .await
        .unwrap();

        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "action not found");
    }

    #[tokio::test]
    async fn upstream_other_frames_are_ignored() {
        let fx = Fixture::new();
        let frames = [
            "not json",
            r#"{"type":"subscribe","topic":"x"}"#,
            r#"{"action":"pump_on"}"#,
        ];
        for frame in frames {
            assert!(handle_upstream_message(frame, &fx.state.dispatcher).await.is_none());
        }
        assert!(fx.publisher.published().is_empty());
    }
}
