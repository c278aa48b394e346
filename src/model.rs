//! Core data model for AuthFlow
//!
//! Defines the session payload persisted per user, the per-audience access
//! token records, and the flow records that correlate outbound redirects
//! with their callbacks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of authentication flow in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Interactive login establishing a new session
    Login,
    /// Linking an additional connection to an existing account
    Link,
    /// Removing a linked connection from an account
    Unlink,
}

/// Record of a pending flow, keyed by its one-time state token
///
/// Owned exclusively by the flow state store. Mutated only by the flow
/// initiator (to seed correlated data) and the callback handler (to mark
/// completion); deleted on completion, failure, or timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub kind: FlowKind,
    /// Set by the callback handler once the session is persisted
    pub completed: bool,
    /// Subject the flow resolved to, or the pre-seeded primary user for
    /// link/unlink flows
    pub user_id: Option<String>,
    /// Where the browser should land after the callback
    pub return_to: Option<String>,
    /// Connection being logged into, linked, or unlinked
    pub connection: Option<String>,
    /// Audience requested for this flow, used to attribute the minted
    /// access token when the token itself is opaque
    pub audience: Option<String>,
    /// Scope requested for this flow
    pub scope: Option<String>,
}

impl FlowRecord {
    /// Create a fresh, uncompleted record
    pub fn new(kind: FlowKind, return_to: Option<String>) -> Self {
        Self {
            kind,
            completed: false,
            user_id: None,
            return_to,
            connection: None,
            audience: None,
            scope: None,
        }
    }
}

/// Access token cached for one audience
///
/// Replaced, never merged, when a fresher token for the same audience
/// is obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub audience: String,
    pub access_token: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AccessTokenRecord {
    /// Whether the token is still usable, with a safety buffer before
    /// the hard expiry
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(crate::constants::TOKEN_EXPIRY_BUFFER_SECS)
            < self.expires_at
    }

    /// Whether this record's scope satisfies every scope the caller needs
    pub fn satisfies_scope(&self, required: &str) -> bool {
        let granted: BTreeSet<&str> = self
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        required.split_whitespace().all(|s| granted.contains(s))
    }
}

/// Verified ID token kept in the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenRecord {
    /// Raw compact JWT as issued by the provider
    pub raw: String,
    /// Expiry from the verified `exp` claim
    pub expires_at: DateTime<Utc>,
}

/// Per-user session state, persisted only as a signed blob
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Profile claims from the most recent verified ID token
    #[serde(default)]
    pub user: serde_json::Map<String, serde_json::Value>,
    /// Most recent verified ID token, if any flow produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdTokenRecord>,
    /// Refresh token, preserved across updates unless the provider
    /// issues a new one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access tokens, at most one per audience
    #[serde(default)]
    pub tokens: Vec<AccessTokenRecord>,
    /// Connections currently linked to this account
    #[serde(default)]
    pub linked_connections: BTreeSet<String>,
}

impl SessionPayload {
    /// Insert or replace the record for `record.audience`
    pub fn upsert_token(&mut self, record: AccessTokenRecord) {
        if let Some(existing) = self
            .tokens
            .iter_mut()
            .find(|t| t.audience == record.audience)
        {
            *existing = record;
        } else {
            self.tokens.push(record);
        }
    }

    /// Find the cached token for an audience
    pub fn token_for(&self, audience: &str) -> Option<&AccessTokenRecord> {
        self.tokens.iter().find(|t| t.audience == audience)
    }

    /// Session freshness marker: the latest of the ID-token expiry and
    /// the access-token expiries, so a refresh that rotates only the
    /// access token still extends the session
    pub fn freshness_marker(&self) -> Option<DateTime<Utc>> {
        self.id_token
            .as_ref()
            .map(|t| t.expires_at)
            .into_iter()
            .chain(self.tokens.iter().map(|t| t.expires_at))
            .max()
    }
}

/// Token endpoint response from the identity provider
///
/// The shape returned by both code exchange and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
}

/// Federated upstream token obtained via token exchange for a linked
/// connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Response from a pushed authorization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    pub expires_in: u64,
}
