//! Wire messages for the WebSocket feed.
//!
//! Clients manage their own room membership over a single connection:
//!
//! ```json
//! {"type": "subscribe", "rooms": ["model:gpt-4o", "status:global"]}
//! {"type": "unsubscribe", "rooms": ["model:gpt-4o"]}
//! {"type": "ping"}
//! ```
//!
//! The server acks each room separately with `subscribed` (followed by a
//! `backfill` of that room's recent events) or `error`, answers
//! `unsubscribed` and `pong`, and pushes routed change events as `event`
//! messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message received from a client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { rooms: Vec<String> },
    Unsubscribe { rooms: Vec<String> },
    Ping,
}

/// Message sent to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A routed change event for one subscribed room.
    Event { room: String, event: Value },
    /// The room's buffered recent events, oldest first, sent on subscribe.
    Backfill { room: String, events: Vec<Value> },
    Subscribed { room: String },
    Unsubscribed { room: String },
    Pong { timestamp: DateTime<Utc> },
    Error { message: String },
}

impl ServerMessage {
    /// Serialize for the wire. Message construction is infallible, so a
    /// serialization failure collapses to an error message rather than
    /// killing the connection.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"serialization failed: {}"}}"#, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelsync_common::time;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","rooms":["status:global","model:gpt-4o"]}"#,
        )
        .unwrap();
        assert!(
            matches!(msg, ClientMessage::Subscribe { rooms } if rooms == ["status:global", "model:gpt-4o"])
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"unsubscribe","rooms":["model:gpt-4o"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { rooms } if rooms == ["model:gpt-4o"]));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let json = ServerMessage::Pong { timestamp: time::now() }.to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());

        let json = ServerMessage::Event {
            room: "model:gpt-4o".to_string(),
            event: json!({"type": "ModelUpdated"}),
        }
        .to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["room"], "model:gpt-4o");
        assert_eq!(value["event"]["type"], "ModelUpdated");
    }

    #[test]
    fn test_backfill_preserves_event_order() {
        let json = ServerMessage::Backfill {
            room: "status:global".to_string(),
            events: vec![json!({"n": 1}), json!({"n": 2})],
        }
        .to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["events"][0]["n"], 1);
        assert_eq!(value["events"][1]["n"], 2);
    }
}
