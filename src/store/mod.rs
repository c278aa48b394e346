//! Session store backends
//!
//! A session store is a key-value map from subject id to the signed
//! session blob. Backends implement a unified trait so the engine can be
//! constructed against an in-memory map, the bundled SQLite store, or an
//! externally supplied implementation.

pub mod memory;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::constants::{STORE_DRIVER_MEMORY, STORE_DRIVER_SQLITE};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Key-value store holding one encrypted session blob per user
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the stored blob for a user
    async fn get(&self, user_id: &str) -> Result<Option<String>>;

    /// Store or replace the blob for a user
    async fn set(&self, user_id: &str, blob: &str) -> Result<()>;

    /// Delete the blob for a user; deleting a missing entry is a no-op
    async fn delete(&self, user_id: &str) -> Result<()>;

    /// List the user ids with a stored session
    async fn list_keys(&self) -> Result<Vec<String>>;
}

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Create a session store backend from configuration
pub async fn create_store_from_config(config: &StoreConfig) -> Result<Arc<dyn SessionStore>> {
    match config.driver.as_str() {
        STORE_DRIVER_MEMORY => Ok(Arc::new(MemoryStore::new())),
        STORE_DRIVER_SQLITE => Ok(Arc::new(SqliteStore::new(&config.dsn).await?)),
        _ => Err(crate::AuthFlowError::config(format!(
            "Unknown store driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}
