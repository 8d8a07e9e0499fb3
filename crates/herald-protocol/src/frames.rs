//! Frame types for the Herald socket protocol.
//!
//! Clients send [`ClientFrame`]s tagged by event name. The server answers
//! with [`ServerFrame`]s: an event name and a list of positional arguments,
//! almost always `[channel, payload]`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::member::Member;

/// Event names used on the wire.
pub mod events {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const CLIENT_EVENT: &str = "client event";
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIPTION_ERROR: &str = "subscription_error";
    pub const PRESENCE_SUBSCRIBED: &str = "presence:subscribed";
    pub const PRESENCE_JOINING: &str = "presence:joining";
    pub const PRESENCE_LEAVING: &str = "presence:leaving";
}

/// Extra options a client sends along with a subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthOptions {
    /// Headers forwarded to the auth endpoint.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Payload of a `subscribe` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeData {
    /// Channel to join.
    #[serde(default)]
    pub channel: String,
    /// Auth options for private and presence channels.
    #[serde(default)]
    pub auth: AuthOptions,
}

impl SubscribeData {
    /// Create a subscription request without auth headers.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            auth: AuthOptions::default(),
        }
    }

    /// Add a header forwarded to the auth endpoint.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth.headers.insert(name.into(), value.into());
        self
    }
}

/// Payload of an `unsubscribe` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeData {
    /// Channel to leave.
    #[serde(default)]
    pub channel: String,
}

/// Payload of a client-to-client event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientEventData {
    /// Target channel.
    #[serde(default)]
    pub channel: String,
    /// Event name, e.g. `client-typing`.
    #[serde(default)]
    pub event: String,
    /// Application payload relayed as-is.
    #[serde(default)]
    pub data: Value,
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Join a channel.
    #[serde(rename = "subscribe")]
    Subscribe(SubscribeData),

    /// Leave a channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe(UnsubscribeData),

    /// Whisper to the other members of a channel.
    #[serde(rename = "client event")]
    ClientEvent(ClientEventData),
}

impl ClientFrame {
    /// Get the wire name of this frame.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Subscribe(_) => events::SUBSCRIBE,
            ClientFrame::Unsubscribe(_) => events::UNSUBSCRIBE,
            ClientFrame::ClientEvent(_) => events::CLIENT_EVENT,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Subscribe(SubscribeData::new(channel))
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe(UnsubscribeData {
            channel: channel.into(),
        })
    }

    /// Create a new client event frame.
    #[must_use]
    pub fn client_event(channel: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        ClientFrame::ClientEvent(ClientEventData {
            channel: channel.into(),
            event: event.into(),
            data,
        })
    }
}

/// A frame sent by the server: an event with positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Event name.
    pub event: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ServerFrame {
    /// Create a frame with arbitrary arguments.
    #[must_use]
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// An application event delivered on a channel.
    #[must_use]
    pub fn broadcast(event: impl Into<String>, channel: &str, data: Value) -> Self {
        Self::new(event, vec![json!(channel), data])
    }

    /// Sent once when a socket connects.
    #[must_use]
    pub fn connected(socket_id: &str, version: &str) -> Self {
        Self::new(
            events::CONNECTED,
            vec![json!({ "socket_id": socket_id, "version": version })],
        )
    }

    /// A rejected subscription, carrying the auth status code.
    #[must_use]
    pub fn subscription_error(channel: &str, code: u16) -> Self {
        Self::new(events::SUBSCRIPTION_ERROR, vec![json!(channel), json!(code)])
    }

    /// The roster sent to a socket that just joined a presence channel.
    #[must_use]
    pub fn presence_subscribed(channel: &str, members: &[Member]) -> Self {
        Self::new(
            events::PRESENCE_SUBSCRIBED,
            vec![json!(channel), json!(members)],
        )
    }

    /// A user's first socket joined a presence channel.
    #[must_use]
    pub fn presence_joining(channel: &str, member: &Member) -> Self {
        Self::new(events::PRESENCE_JOINING, vec![json!(channel), json!(member)])
    }

    /// A user's last socket left a presence channel.
    #[must_use]
    pub fn presence_leaving(channel: &str, member: &Member) -> Self {
        Self::new(events::PRESENCE_LEAVING, vec![json!(channel), json!(member)])
    }

    /// The channel argument, when the first argument is a string.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.args.first().and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_names() {
        assert_eq!(ClientFrame::subscribe("a").name(), "subscribe");
        assert_eq!(ClientFrame::unsubscribe("a").name(), "unsubscribe");
        assert_eq!(
            ClientFrame::client_event("private-a", "client-typing", Value::Null).name(),
            "client event"
        );
    }

    #[test]
    fn test_subscribe_json_shape() {
        let frame = ClientFrame::Subscribe(
            SubscribeData::new("private-orders").with_header("Authorization", "Bearer x"),
        );
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["event"], "subscribe");
        assert_eq!(value["data"]["channel"], "private-orders");
        assert_eq!(value["data"]["auth"]["headers"]["Authorization"], "Bearer x");
    }

    #[test]
    fn test_subscribe_defaults() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"subscribe","data":{}}"#).unwrap();
        assert_eq!(frame, ClientFrame::Subscribe(SubscribeData::default()));
    }

    #[test]
    fn test_server_frame_args() {
        let member = Member::new(3).with_socket("s-1");
        let frame = ServerFrame::presence_joining("presence-lobby", &member);

        assert_eq!(frame.event, events::PRESENCE_JOINING);
        assert_eq!(frame.channel(), Some("presence-lobby"));
        assert_eq!(frame.args[1]["user_id"], 3);

        let error = ServerFrame::subscription_error("private-a", 403);
        assert_eq!(error.args, vec![json!("private-a"), json!(403)]);
    }
}
