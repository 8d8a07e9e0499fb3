//! Presence store backends.

pub mod redis;
pub mod sqlite;

use anyhow::{Context, Result};
use herald_core::{KeyValueStore, MemoryStore};
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, DatabaseKind};

pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

/// Open the configured presence store.
///
/// # Errors
///
/// Returns an error if the backend cannot be reached or initialized.
pub async fn open(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.database {
        DatabaseKind::Memory => Arc::new(MemoryStore::new()),
        DatabaseKind::Redis => Arc::new(
            RedisStore::connect(
                &config.database_config.redis.url,
                config.database_config.publish_presence,
            )
            .await
            .context("Failed to open Redis presence store")?,
        ),
        DatabaseKind::Sqlite => Arc::new(
            SqliteStore::open(&config.database_config.sqlite.path)
                .context("Failed to open SQLite presence store")?,
        ),
    };

    info!(backend = ?config.database, "Presence store ready");
    Ok(store)
}
