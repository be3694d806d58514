//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::KeyValueStore;

pub mod eval;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteItemStore;

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error + Send + Sync>> {
    let index_names: Vec<&str> = config.indexes.iter().map(|i| i.name.as_str()).collect();

    match config.storage_type {
        StorageType::Memory => {
            info!(storage = "memory", indexes = ?index_names, "Storage initialized");
            Ok(Arc::new(InMemoryStore::with_indexes(
                config.indexes.clone(),
            )))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            use std::str::FromStr;

            use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

            let path = config.sqlite.path.as_str();
            let (options, max_connections) = if path == ":memory:" {
                (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
            } else {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                (
                    SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true),
                    config.sqlite.max_connections,
                )
            };

            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            let store = SqliteItemStore::new(pool, config.indexes.clone());
            store.init().await?;

            info!(storage = "sqlite", path = %path, indexes = ?index_names, "Storage initialized");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
