//! Flow state tracking
//!
//! Process-wide map from one-time state tokens to pending flow records.
//! The state token is the CSRF defense: a callback whose state is absent
//! from this store is rejected, and entries are deleted exactly once on
//! completion, failure, or timeout so replayed callbacks always miss.
//!
//! Each entry carries a `Notify` so a suspended flow initiator wakes on
//! completion or eviction instead of polling.

pub mod engine;

use crate::model::{FlowKind, FlowRecord};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

struct FlowEntry {
    record: FlowRecord,
    /// Set once a callback handler takes ownership of this flow's code
    /// exchange; a second delivery of the same state must not exchange
    /// the single-use code again
    claimed: bool,
    notify: Arc<Notify>,
}

/// Store of pending flows, keyed by state token
#[derive(Default)]
pub struct FlowStateStore {
    entries: DashMap<String, FlowEntry>,
}

impl FlowStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new flow and mint its state token
    pub fn create(&self, kind: FlowKind, return_to: Option<String>) -> String {
        let token = generate_state_token();
        self.entries.insert(
            token.clone(),
            FlowEntry {
                record: FlowRecord::new(kind, return_to),
                claimed: false,
                notify: Arc::new(Notify::new()),
            },
        );
        token
    }

    /// Look up the record for a state token
    ///
    /// `None` is the canonical invalid/expired/replayed-state signal.
    pub fn get(&self, token: &str) -> Option<FlowRecord> {
        self.entries.get(token).map(|e| e.record.clone())
    }

    /// Record the resolved user and mark the flow completed, waking the
    /// waiting initiator
    ///
    /// Returns false when the token no longer exists (the flow timed out
    /// or was evicted concurrently).
    pub fn mark_completed(&self, token: &str, user_id: &str) -> bool {
        match self.entries.get_mut(token) {
            Some(mut entry) => {
                entry.record.user_id = Some(user_id.to_string());
                entry.record.completed = true;
                entry.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Pre-seed the primary user id before the redirect, so link/unlink
    /// callbacks can attribute the connection even though the callback
    /// authenticates at the linked provider
    pub fn set_pending_user(&self, token: &str, user_id: &str) -> bool {
        self.update(token, |record| {
            record.user_id = Some(user_id.to_string());
        })
    }

    /// Delete a pending flow, waking any waiter
    ///
    /// Deleting an already-deleted token is a no-op, not an error.
    pub fn delete(&self, token: &str) {
        if let Some((_, entry)) = self.entries.remove(token) {
            entry.notify.notify_one();
        }
    }

    /// The notifier for a pending flow, used by the initiator to suspend
    /// until completion or eviction
    pub fn subscribe(&self, token: &str) -> Option<Arc<Notify>> {
        self.entries.get(token).map(|e| e.notify.clone())
    }

    /// Number of flows currently pending
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no flows are pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomically take ownership of a pending flow for its one code
    /// exchange
    ///
    /// Returns the record on first claim; `None` for an unknown token or
    /// one already claimed or resolved, so concurrent duplicate
    /// callbacks cannot both exchange the single-use code.
    pub(crate) fn claim(&self, token: &str) -> Option<FlowRecord> {
        let mut entry = self.entries.get_mut(token)?;
        if entry.claimed || entry.record.completed {
            return None;
        }
        entry.claimed = true;
        Some(entry.record.clone())
    }

    /// Apply a mutation to a pending record under the entry lock
    pub(crate) fn update<F: FnOnce(&mut FlowRecord)>(&self, token: &str, mutate: F) -> bool {
        match self.entries.get_mut(token) {
            Some(mut entry) => {
                mutate(&mut entry.record);
                true
            }
            None => false,
        }
    }
}

/// Generate a state token: 32 bytes of CSPRNG entropy, base64url
pub fn generate_state_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}
