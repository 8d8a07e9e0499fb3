//! Application events flowing from ingestion sources to the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where an event entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestSource {
    /// `POST /apps/{app_id}/events`.
    Http,
    /// Redis pub/sub.
    Redis,
}

impl IngestSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IngestSource::Http => "http",
            IngestSource::Redis => "redis",
        }
    }
}

impl fmt::Display for IngestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by the backend application for one channel.
///
/// Deserializes from the payload the application publishes on Redis:
/// `{"event": .., "data": .., "socket": ..}`. The channel comes from the
/// pub/sub channel name and is filled in afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Target channel.
    #[serde(default)]
    pub channel: String,
    /// Event name delivered to clients.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Socket that triggered the event, excluded from delivery.
    #[serde(default, alias = "socket_id")]
    pub socket: Option<String>,
}

impl EventMessage {
    /// Create a new message.
    #[must_use]
    pub fn new(channel: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            data,
            socket: None,
        }
    }

    /// Create a message with an originating socket.
    #[must_use]
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    /// Set the channel.
    #[must_use]
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// The originating socket, if one was given.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.socket.as_deref().filter(|s| !s.is_empty())
    }
}
