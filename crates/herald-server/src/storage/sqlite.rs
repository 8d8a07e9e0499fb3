//! SQLite-backed presence store.

use async_trait::async_trait;
use herald_core::{KeyValueStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS key_value (key VARCHAR(255), value TEXT);
    CREATE UNIQUE INDEX IF NOT EXISTS key_index ON key_value (key);
";

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Presence store in a local SQLite file.
///
/// Queries run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and its table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(backend)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        info!(path = %path.display(), "Opened SQLite presence store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Backend("SQLite connection poisoned".into()))?;
            f(&conn).map_err(backend)
        })
        .await
        .map_err(backend)?
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = key.to_string();
        let value: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT value FROM key_value WHERE key = ?1 LIMIT 1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(value.map(String::into_bytes))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = String::from_utf8(value).map_err(backend)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO key_value (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_get_set_replace() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("presence-a:members").await.unwrap(), None);

        store.set("presence-a:members", b"[1]".to_vec()).await.unwrap();
        store.set("presence-a:members", b"[2]".to_vec()).await.unwrap();

        assert_eq!(
            store.get("presence-a:members").await.unwrap(),
            Some(b"[2]".to_vec())
        );
    }

    #[tokio::test]
    async fn test_sqlite_backs_presence_registry() {
        use herald_core::{PresenceRegistry, Transport};
        use herald_protocol::Member;
        use herald_transport::RoomTransport;

        let transport = Arc::new(RoomTransport::default());
        let _rx = transport.register("a");
        transport.join_room("a", "presence-lobby");

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let registry = PresenceRegistry::new(store, transport);
        registry
            .join("a", "presence-lobby", Some(Member::new(1)))
            .await
            .unwrap();

        assert!(registry.is_member("presence-lobby", 1).await.unwrap());
    }
}
