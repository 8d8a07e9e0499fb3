//! Redis pub/sub event source.

use futures_util::StreamExt;
use herald_core::{EventMessage, EventSink, IngestSource};
use redis::{Client, RedisError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::strip_prefix;
use crate::metrics;

/// Decode a payload published by the application on `channel`.
///
/// # Errors
///
/// Returns an error if the payload is not an event object.
pub fn decode_event(
    key_prefix: &str,
    channel: &str,
    payload: &[u8],
) -> Result<EventMessage, serde_json::Error> {
    let message: EventMessage = serde_json::from_slice(payload)?;
    Ok(message.on_channel(strip_prefix(key_prefix, channel)))
}

/// Listens on every channel under the key prefix and forwards events to
/// the dispatcher.
pub struct RedisSubscriber {
    client: Client,
    key_prefix: String,
    events: EventSink,
}

impl RedisSubscriber {
    /// Create a subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(
        url: &str,
        key_prefix: impl Into<String>,
        events: EventSink,
    ) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.into(),
            events,
        })
    }

    /// Run until shutdown is signalled or the dispatcher goes away.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be set up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RedisError> {
        let pattern = format!("{}*", self.key_prefix);

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(&pattern).await?;
        info!(pattern = %pattern, "Listening for Redis events");

        let mut messages = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Redis subscriber shutting down");
                    break;
                }
                msg = messages.next() => match msg {
                    Some(msg) => msg,
                    None => {
                        warn!("Redis subscription stream ended");
                        break;
                    }
                },
            };

            let channel = msg.get_channel_name();
            let event = match decode_event(&self.key_prefix, channel, msg.get_payload_bytes()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Skipping malformed Redis event");
                    metrics::record_error("redis_payload");
                    continue;
                }
            };

            trace!(channel = %event.channel, event = %event.event, "Event received over Redis");
            if self.events.publish(IngestSource::Redis, event).await.is_err() {
                debug!("Dispatcher closed, stopping Redis subscriber");
                break;
            }
            metrics::record_broadcast(IngestSource::Redis);
        }

        info!("Redis subscriber stopped");
        Ok(())
    }
}
