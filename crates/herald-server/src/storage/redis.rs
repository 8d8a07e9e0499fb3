//! Redis-backed presence store.

use async_trait::async_trait;
use herald_core::{KeyValueStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{debug, info, warn};

/// Channel on which presence list changes are published.
pub const PRESENCE_UPDATED_CHANNEL: &str = "PresenceChannelUpdated";

fn is_presence_key(key: &str) -> bool {
    key.starts_with("presence-") && key.ends_with(":members")
}

/// The `PresenceChannelUpdated` payload for a write, if the key holds a
/// presence member list.
///
/// # Errors
///
/// Returns an error if the value is not JSON.
pub fn presence_update(key: &str, value: &[u8]) -> Result<Option<String>, StoreError> {
    if !is_presence_key(key) {
        return Ok(None);
    }

    let members: serde_json::Value = serde_json::from_slice(value)?;
    let payload = serde_json::json!({
        "event": {
            "channel": key,
            "members": members,
        }
    });
    Ok(Some(payload.to_string()))
}

fn backend(e: RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Presence store shared by every server connected to the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    publish_presence: bool,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str, publish_presence: bool) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(publish_presence, "Connected to Redis presence store");
        Ok(Self {
            conn,
            publish_presence,
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(backend)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let update = if self.publish_presence {
            presence_update(key, &value)?
        } else {
            None
        };

        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(backend)?;

        if let Some(payload) = update {
            let mut conn = self.conn.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                let result: Result<i64, RedisError> =
                    conn.publish(PRESENCE_UPDATED_CHANNEL, payload).await;
                match result {
                    Ok(receivers) => debug!(key = %key, receivers, "Published presence update"),
                    Err(e) => warn!(key = %key, error = %e, "Failed to publish presence update"),
                }
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_presence_update_payload() {
        let members = br#"[{"socket_id":"a","user_id":1,"user_info":null}]"#;
        let payload = presence_update("presence-lobby:members", members)
            .unwrap()
            .unwrap();

        let payload: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            payload,
            json!({
                "event": {
                    "channel": "presence-lobby:members",
                    "members": [{"socket_id": "a", "user_id": 1, "user_info": null}]
                }
            })
        );
    }

    #[test]
    fn test_presence_update_ignores_other_keys() {
        assert_eq!(presence_update("private-a:members", b"[]").unwrap(), None);
        assert_eq!(presence_update("presence-a", b"[]").unwrap(), None);
    }

    #[test]
    fn test_presence_update_rejects_malformed_value() {
        assert!(presence_update("presence-a:members", b"{nope").is_err());
    }
}
