//! In-memory session store
//!
//! Fast, non-persistent storage for development and testing. Uses DashMap
//! for lock-free concurrent access; operations on different keys never
//! block each other.
//!
//! **WARNING:** sessions are lost on process restart and are not shared
//! across process instances. Use `SqliteStore` or an external store for
//! production deployments.

use super::*;
use dashmap::DashMap;

/// In-memory session store backed by a concurrent map
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.sessions.get(user_id).map(|r| r.clone()))
    }

    async fn set(&self, user_id: &str, blob: &str) -> Result<()> {
        self.sessions.insert(user_id.to_string(), blob.to_string());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.sessions.remove(user_id);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
