//! Session lifecycle management
//!
//! Orchestrates the token codec, session store, and provider client to
//! create, merge, and refresh per-user sessions, and to resolve "is this
//! access token, for this audience and scope, still valid" for callers.
//!
//! Refreshes are serialized per user id: concurrent callers share one
//! in-flight refresh RPC instead of racing to consume the stored refresh
//! token. No store or map lock is held across a provider RPC; mutations
//! are computed from RPC results and applied as short atomic updates.

use crate::codec::{SessionClaims, TokenCodec};
use crate::config::AuthConfig;
use crate::model::{
    AccessTokenRecord, FlowKind, FlowRecord, IdTokenRecord, SessionPayload, TokenResponse,
};
use crate::provider::IdentityClient;
use crate::store::SessionStore;
use crate::{AuthFlowError, Result};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of an access-token lookup
#[derive(Debug, Clone)]
pub enum AccessTokenOutcome {
    /// A cached (possibly silently refreshed) token satisfying the request
    Token(AccessTokenRecord),
    /// The caller must start a fresh authorize redirect; token upgrades
    /// are never attempted silently because scope expansion requires
    /// user consent
    NeedsReauthorization,
}

/// Manages per-user session state and token freshness
pub struct SessionManager {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    provider: Arc<IdentityClient>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    /// Create a session manager over a store and provider client
    pub fn new(
        config: &AuthConfig,
        provider: Arc<IdentityClient>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(&config.session_secret),
            store,
            provider,
            refresh_locks: DashMap::new(),
        }
    }

    /// Verify a session blob (e.g. from a reconstructed cookie) and
    /// return its claims
    pub fn decode_blob(&self, blob: &str) -> Result<SessionClaims> {
        self.codec.decode(blob)
    }

    /// The currently stored blob for a user, if any
    pub async fn current_blob(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get(user_id).await
    }

    /// Create or update the session resulting from a completed flow
    ///
    /// The subject is the verified ID token's `sub` claim; when the
    /// response carries no ID token (link/unlink completions without
    /// `openid` scope) it falls back to the flow-correlated user id.
    /// Existing session state for the subject is merged: the previous
    /// refresh token is retained unless the provider rotated it, access
    /// tokens for untouched audiences are kept, and the linked-connection
    /// set is updated per flow kind.
    ///
    /// Returns the resolved user id and the newly signed blob.
    pub async fn start_session(
        &self,
        tokens: &TokenResponse,
        record: &FlowRecord,
    ) -> Result<(String, String)> {
        let (user_id, verified_claims) = match &tokens.id_token {
            Some(raw) => {
                let claims = self.provider.verify_id_token(raw).await?;
                let sub = claims
                    .get("sub")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AuthFlowError::verification("ID token missing 'sub' claim"))?
                    .to_string();
                (sub, Some(claims))
            }
            None => {
                let sub = record.user_id.clone().ok_or_else(|| {
                    AuthFlowError::verification(
                        "token response has no ID token and the flow has no correlated user",
                    )
                })?;
                (sub, None)
            }
        };

        let existing = match self.store.get(&user_id).await? {
            Some(blob) => match self.codec.decode(&blob) {
                Ok(claims) => Some(claims.session),
                Err(e) => {
                    tracing::warn!("discarding undecodable stored session for {user_id}: {e}");
                    None
                }
            },
            None => None,
        };
        let mut session = existing.unwrap_or_default();

        // Profile claims: a freshly verified ID token wins, else the
        // previous profile stands
        if let Some(claims) = &verified_claims {
            session.user = claims.clone();
        }

        if let (Some(raw), Some(claims)) = (&tokens.id_token, &verified_claims) {
            let exp = claims.get("exp").and_then(|v| v.as_i64()).unwrap_or_default();
            session.id_token = Some(IdTokenRecord {
                raw: raw.clone(),
                expires_at: Utc
                    .timestamp_opt(exp, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            });
        }

        if let Some(refresh_token) = &tokens.refresh_token {
            session.refresh_token = Some(refresh_token.clone());
        }

        let audience = IdentityClient::peek_unverified_audience(&tokens.access_token)
            .or_else(|| record.audience.clone())
            .unwrap_or_else(|| self.provider.default_audience());
        session.upsert_token(AccessTokenRecord {
            audience,
            access_token: tokens.access_token.clone(),
            scope: tokens.scope.clone().or_else(|| record.scope.clone()),
            expires_at: Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64),
        });

        match (record.kind, &record.connection) {
            (FlowKind::Link, Some(connection)) => {
                session.linked_connections.insert(connection.clone());
            }
            (FlowKind::Unlink, Some(connection)) => {
                // Removing a connection that is not linked is a no-op
                session.linked_connections.remove(connection);
            }
            _ => {}
        }

        let blob = self.codec.encode(&user_id, &session)?;
        self.store.set(&user_id, &blob).await?;
        tracing::info!("session created/updated for {user_id}");
        Ok((user_id, blob))
    }

    /// Fetch a user's session, transparently refreshing a stale one
    ///
    /// Fails with `SessionNotFound` when absent. A stale session with no
    /// refresh token is deleted and surfaced as `SessionExpired`.
    pub async fn get_session(&self, user_id: &str) -> Result<SessionPayload> {
        let blob = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| AuthFlowError::SessionNotFound(format!("no session for {user_id}")))?;
        let claims = self.codec.decode(&blob)?;

        if claims.is_fresh(Utc::now()) {
            return Ok(claims.session);
        }

        if claims.session.refresh_token.is_some() {
            self.refresh_session(user_id).await
        } else {
            self.store.delete(user_id).await?;
            Err(AuthFlowError::SessionExpired(format!(
                "session for {user_id} expired with no refresh path"
            )))
        }
    }

    /// Refresh a user's session using the stored refresh token
    ///
    /// Single-flight per user id: at most one refresh RPC is in flight
    /// per user; concurrent callers await its result. On a provider
    /// rejection the stored session is deleted and the error surfaces as
    /// reauthentication-required.
    pub async fn refresh_session(&self, user_id: &str) -> Result<SessionPayload> {
        self.refresh_session_for(user_id, None).await
    }

    /// Single-flight refresh whose "already satisfied" check can target
    /// one audience's token instead of the whole-session marker, so a
    /// caller waiting on a stale audience token is not fobbed off by a
    /// still-fresh ID token
    async fn refresh_session_for(
        &self,
        user_id: &str,
        audience: Option<&str>,
    ) -> Result<SessionPayload> {
        let lock = {
            let entry = self
                .refresh_locks
                .entry(user_id.to_string())
                .or_default();
            entry.value().clone()
        };
        let _guard = lock.lock().await;

        // Double-check under the lock: another caller may have finished
        // the refresh while we waited
        let blob = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| AuthFlowError::SessionNotFound(format!("no session for {user_id}")))?;
        let claims = self.codec.decode(&blob)?;
        let now = Utc::now();
        let already_satisfied = match audience {
            Some(audience) => claims
                .session
                .token_for(audience)
                .is_some_and(|record| record.is_fresh(now)),
            None => claims.is_fresh(now),
        };
        if already_satisfied {
            return Ok(claims.session);
        }

        let Some(refresh_token) = claims.session.refresh_token.clone() else {
            self.store.delete(user_id).await?;
            return Err(AuthFlowError::SessionExpired(format!(
                "session for {user_id} expired with no refresh path"
            )));
        };

        let tokens = match self.provider.refresh(&refresh_token, None).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.store.delete(user_id).await?;
                tracing::warn!("refresh rejected for {user_id}, session deleted: {e}");
                return Err(e);
            }
        };

        // Persist through the normal merge path; the synthetic record
        // pins the subject for responses that carry no ID token
        let record = FlowRecord {
            user_id: Some(user_id.to_string()),
            ..FlowRecord::new(FlowKind::Login, None)
        };
        let (_, blob) = self.start_session(&tokens, &record).await?;
        Ok(self.codec.decode(&blob)?.session)
    }

    /// Resolve an access token for an audience, optionally requiring a
    /// scope
    ///
    /// An exact audience match that is fresh is returned as-is; a stale
    /// match with a refresh token available triggers one silent,
    /// single-flight refresh. A missing audience or an unsatisfied scope
    /// requires a new authorize redirect.
    pub async fn get_access_token(
        &self,
        user_id: &str,
        audience: &str,
        scope: Option<&str>,
    ) -> Result<AccessTokenOutcome> {
        let blob = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| AuthFlowError::SessionNotFound(format!("no session for {user_id}")))?;
        let claims = self.codec.decode(&blob)?;
        let now = Utc::now();

        let satisfies = |record: &AccessTokenRecord| match scope {
            Some(required) => record.satisfies_scope(required),
            None => true,
        };

        let Some(record) = claims.session.token_for(audience).cloned() else {
            return Ok(AccessTokenOutcome::NeedsReauthorization);
        };
        if !satisfies(&record) {
            return Ok(AccessTokenOutcome::NeedsReauthorization);
        }
        if record.is_fresh(now) {
            return Ok(AccessTokenOutcome::Token(record));
        }
        if claims.session.refresh_token.is_none() {
            return Ok(AccessTokenOutcome::NeedsReauthorization);
        }

        let refreshed = self.refresh_session_for(user_id, Some(audience)).await?;
        match refreshed.token_for(audience) {
            Some(record) if record.is_fresh(now) && satisfies(record) => {
                Ok(AccessTokenOutcome::Token(record.clone()))
            }
            _ => Ok(AccessTokenOutcome::NeedsReauthorization),
        }
    }

    /// Delete a user's stored session
    pub async fn delete_session(&self, user_id: &str) -> Result<()> {
        self.store.delete(user_id).await
    }

    /// Revoke the refresh token at the provider and delete the session
    ///
    /// Revocation is best-effort; local deletion proceeds even when the
    /// provider rejects the revocation.
    pub async fn logout(&self, user_id: &str) -> Result<()> {
        let refresh_token = match self.store.get(user_id).await? {
            Some(blob) => self
                .codec
                .decode(&blob)
                .ok()
                .and_then(|claims| claims.session.refresh_token),
            None => None,
        };

        if let Some(refresh_token) = refresh_token
            && let Err(e) = self.provider.revoke(&refresh_token).await
        {
            tracing::warn!("best-effort revocation failed for {user_id}: {e}");
        }

        self.store.delete(user_id).await?;
        tracing::info!("session deleted for {user_id}");
        Ok(())
    }

    /// The user's stored raw ID token, if any
    pub async fn get_id_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_session(user_id)
            .await?
            .id_token
            .map(|t| t.raw))
    }

    /// The user's stored refresh token, if any
    pub async fn get_refresh_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.get_session(user_id).await?.refresh_token)
    }

    /// Fetch the user's profile from the provider using a cached access
    /// token
    pub async fn get_userinfo(
        &self,
        user_id: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let session = self.get_session(user_id).await?;
        let default_audience = self.provider.default_audience();
        let token = session
            .token_for(&default_audience)
            .or_else(|| session.tokens.first())
            .ok_or_else(|| {
                AuthFlowError::SessionExpired(format!("no access token cached for {user_id}"))
            })?;
        self.provider.get_userinfo(&token.access_token).await
    }
}

#[cfg(test)]
mod session_test;
