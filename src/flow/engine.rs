//! Flow engine: login, link, and unlink state machines
//!
//! Each flow moves `Started -> AwaitingCallback -> {Completed, Failed,
//! TimedOut}`. Starting a flow mints a one-time state token, registers a
//! pending record, and produces the authorize (or PAR) redirect URL; the
//! external HTTP layer later delivers the provider callback to
//! [`FlowEngine::handle_callback`], which validates the state, exchanges
//! the code, persists the session, and wakes the suspended initiator.
//!
//! Timeouts evict the pending entry so a late, stale callback is
//! rejected as invalid state; a duplicate callback for an
//! already-resolved state is rejected rather than re-exchanging the
//! single-use authorization code.

use crate::config::AuthConfig;
use crate::constants::{
    AUTHZ_DETAIL_LINK_ACCOUNT, DEFAULT_LOGIN_SCOPE, LINKING_AUDIENCE, LINK_TIMEOUT_SECS,
    LOGIN_TIMEOUT_SECS, SCOPE_LINK_ACCOUNT, SCOPE_UNLINK_ACCOUNT,
};
use crate::flow::FlowStateStore;
use crate::model::FlowKind;
use crate::provider::{AuthorizeParams, IdentityClient};
use crate::session::SessionManager;
use crate::store::create_store_from_config;
use crate::{AuthFlowError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Parameters for starting a login flow
#[derive(Debug, Clone, Default)]
pub struct LoginParams {
    pub connection: Option<String>,
    pub scope: Option<String>,
    pub audience: Option<String>,
    pub return_to: Option<String>,
    /// Provider-specific authorize parameters passed through verbatim
    pub extra: Vec<(String, String)>,
}

/// Terminal resolution of a flow, as observed by its initiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResolution {
    /// Callback arrived, session persisted
    Completed { user_id: String },
    /// Provider error redirect or code-exchange failure evicted the flow
    Failed,
    /// No callback within the flow's budget; the pending state was
    /// deleted so a late callback is rejected
    TimedOut,
}

/// Result of a processed callback, for the HTTP layer to turn into
/// cookies and a redirect
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub user_id: String,
    /// Newly signed session blob
    pub session_blob: String,
    /// Where the browser asked to land after the flow
    pub return_to: Option<String>,
    /// Access-token lifetime, which bounds the cookie expiry
    pub expires_in: u64,
}

/// A started flow whose initiator has not yet observed resolution
///
/// Exposes the redirect URL for delivery to the user's browser; `wait`
/// suspends the caller until the callback resolves the flow or the
/// budget elapses.
pub struct PendingFlow {
    state: String,
    authorize_url: Url,
    budget: Duration,
    flows: Arc<FlowStateStore>,
}

impl PendingFlow {
    /// The one-time state token correlating this flow's callback
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The URL the user's browser must visit to run the flow
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// Suspend until the flow resolves or the budget elapses
    ///
    /// The wait is a cancellable suspension woken by the callback
    /// handler, not a poll loop. If completion and the deadline race,
    /// completion wins only when it was recorded strictly before the
    /// deadline check observes the record; otherwise the flow times out
    /// and its pending state is evicted.
    pub async fn wait(self) -> FlowResolution {
        let deadline = tokio::time::Instant::now() + self.budget;

        loop {
            let Some(notify) = self.flows.subscribe(&self.state) else {
                // Entry evicted: provider error or exchange failure
                return FlowResolution::Failed;
            };

            match self.flows.get(&self.state) {
                None => return FlowResolution::Failed,
                Some(record) if record.completed => {
                    self.flows.delete(&self.state);
                    return FlowResolution::Completed {
                        user_id: record.user_id.unwrap_or_default(),
                    };
                }
                Some(_) => {}
            }

            // notify_one stores a permit, so a completion signaled between
            // the check above and this await still wakes us immediately
            let notified = notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.flows.get(&self.state) {
                    Some(record) if record.completed => {
                        self.flows.delete(&self.state);
                        FlowResolution::Completed {
                            user_id: record.user_id.unwrap_or_default(),
                        }
                    }
                    _ => {
                        self.flows.delete(&self.state);
                        FlowResolution::TimedOut
                    }
                };
            }
        }
    }
}

/// Drives login, link, and unlink flows to completion
pub struct FlowEngine {
    config: Arc<AuthConfig>,
    provider: Arc<IdentityClient>,
    sessions: Arc<SessionManager>,
    flows: Arc<FlowStateStore>,
}

impl FlowEngine {
    /// Assemble an engine from injected collaborators
    pub fn new(
        config: Arc<AuthConfig>,
        provider: Arc<IdentityClient>,
        sessions: Arc<SessionManager>,
        flows: Arc<FlowStateStore>,
    ) -> Self {
        Self {
            config,
            provider,
            sessions,
            flows,
        }
    }

    /// The session manager backing this engine
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The provider client backing this engine
    pub fn provider(&self) -> &Arc<IdentityClient> {
        &self.provider
    }

    /// The flow state store backing this engine
    pub fn flows(&self) -> &Arc<FlowStateStore> {
        &self.flows
    }

    /// The engine configuration
    pub fn config(&self) -> &Arc<AuthConfig> {
        &self.config
    }

    /// Register a login flow and build its redirect URL without
    /// suspending
    ///
    /// Used by the HTTP login route, which answers with a 302 instead of
    /// waiting for the callback.
    pub fn begin_login(&self, params: &LoginParams) -> Result<(String, Url)> {
        let scope = params
            .scope
            .clone()
            .unwrap_or_else(|| DEFAULT_LOGIN_SCOPE.to_string());

        let state = self.flows.create(FlowKind::Login, params.return_to.clone());
        self.flows.update(&state, |record| {
            record.connection = params.connection.clone();
            record.audience = params.audience.clone();
            record.scope = Some(scope.clone());
        });

        let url = self.provider.build_authorize_url(&AuthorizeParams {
            state: state.clone(),
            connection: params.connection.clone(),
            scope: Some(scope),
            audience: params.audience.clone(),
            extra: params.extra.clone(),
        })?;

        tracing::info!("login flow started");
        Ok((state, url))
    }

    /// Start a login flow
    ///
    /// Returns a handle carrying the authorize URL; `wait` on the handle
    /// suspends until the callback resolves the flow or the 120 s login
    /// budget elapses.
    pub async fn start_login(
        &self,
        connection: Option<&str>,
        scope: Option<&str>,
    ) -> Result<PendingFlow> {
        let (state, authorize_url) = self.begin_login(&LoginParams {
            connection: connection.map(String::from),
            scope: scope.map(String::from),
            ..Default::default()
        })?;

        Ok(PendingFlow {
            state,
            authorize_url,
            budget: Duration::from_secs(LOGIN_TIMEOUT_SECS),
            flows: self.flows.clone(),
        })
    }

    /// Start an account-link flow for `primary_user_id`
    ///
    /// The primary user id is bound to the flow before the redirect so
    /// the callback can attribute the new connection even though it
    /// authenticates a possibly different identity at the linked
    /// provider. The authorization parameters travel via a pushed
    /// authorization request, keeping them off the browser URL.
    pub async fn start_link(
        &self,
        primary_user_id: &str,
        connection: &str,
        id_token: &str,
        scope: Option<&str>,
    ) -> Result<PendingFlow> {
        self.start_link_flow(
            FlowKind::Link,
            primary_user_id,
            connection,
            id_token,
            scope,
        )
        .await
    }

    /// Start an account-unlink flow, symmetric to `start_link`; on
    /// completion the connection is removed from the linked set
    pub async fn start_unlink(
        &self,
        primary_user_id: &str,
        connection: &str,
        id_token: &str,
    ) -> Result<PendingFlow> {
        self.start_link_flow(FlowKind::Unlink, primary_user_id, connection, id_token, None)
            .await
    }

    async fn start_link_flow(
        &self,
        kind: FlowKind,
        primary_user_id: &str,
        connection: &str,
        id_token: &str,
        scope: Option<&str>,
    ) -> Result<PendingFlow> {
        let operation_scope = match kind {
            FlowKind::Unlink => SCOPE_UNLINK_ACCOUNT,
            _ => SCOPE_LINK_ACCOUNT,
        };

        let state = self.flows.create(kind, None);
        self.flows.set_pending_user(&state, primary_user_id);
        self.flows.update(&state, |record| {
            record.connection = Some(connection.to_string());
            record.audience = Some(LINKING_AUDIENCE.to_string());
            record.scope = Some(operation_scope.to_string());
        });

        let authorization_details = serde_json::to_string(&serde_json::json!([{
            "type": AUTHZ_DETAIL_LINK_ACCOUNT,
            "requested_connection": connection,
        }]))?;

        let mut par_params: Vec<(String, String)> = vec![
            ("response_type".to_string(), "code".to_string()),
            (
                "redirect_uri".to_string(),
                self.config.redirect_uri.clone(),
            ),
            ("audience".to_string(), LINKING_AUDIENCE.to_string()),
            ("state".to_string(), state.clone()),
            (
                "authorization_details".to_string(),
                authorization_details,
            ),
            ("scope".to_string(), operation_scope.to_string()),
            ("id_token_hint".to_string(), id_token.to_string()),
        ];
        if let Some(scope) = scope {
            par_params.push(("requested_connection_scope".to_string(), scope.to_string()));
        }

        let par = match self.provider.push_authorization_request(&par_params).await {
            Ok(par) => par,
            Err(e) => {
                // The flow can never complete without a redirect
                self.flows.delete(&state);
                return Err(e);
            }
        };
        let authorize_url = self
            .provider
            .build_authorize_par_url(&state, &par.request_uri)?;

        tracing::info!("{kind:?} flow started for {primary_user_id}");
        Ok(PendingFlow {
            state,
            authorize_url,
            budget: Duration::from_secs(LINK_TIMEOUT_SECS),
            flows: self.flows.clone(),
        })
    }

    /// Process the provider callback: the single entrypoint the external
    /// HTTP layer calls
    ///
    /// Rejects provider error redirects, missing `code`/`state`, and
    /// unknown or already-resolved state tokens; exchanges the code
    /// exactly once; persists the session; marks the flow completed.
    pub async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome> {
        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| "unknown provider error".to_string());
            if let Some(state) = params.get("state") {
                self.flows.delete(state);
            }
            tracing::warn!("provider error redirect: {error}");
            return Err(AuthFlowError::callback(format!("{error}: {description}")));
        }

        let (code, state) = match (params.get("code"), params.get("state")) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                return Err(AuthFlowError::callback(
                    "missing required query parameters: code, state",
                ));
            }
        };

        // Atomic claim: a browser retry or concurrent duplicate delivery
        // must not re-exchange the single-use code
        let record = self
            .flows
            .claim(state)
            .ok_or_else(|| AuthFlowError::csrf("unknown, expired, or replayed state"))?;

        let tokens = match self.provider.exchange_code(code).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.flows.delete(state);
                return Err(e);
            }
        };

        let (user_id, session_blob) = match self.sessions.start_session(&tokens, &record).await {
            Ok(result) => result,
            Err(e) => {
                self.flows.delete(state);
                return Err(e);
            }
        };

        if !self.flows.mark_completed(state, &user_id) {
            // The initiator timed out while the code exchange was in
            // flight; the session is persisted, but this callback no
            // longer correlates to a live flow
            return Err(AuthFlowError::csrf("flow timed out before completion"));
        }

        tracing::info!("{:?} flow completed for {user_id}", record.kind);
        Ok(CallbackOutcome {
            user_id,
            session_blob,
            return_to: record.return_to,
            expires_in: tokens.expires_in,
        })
    }
}

/// Build a fully wired engine from configuration: provider client,
/// session store backend, session manager, and flow state store
pub async fn build_engine(config: AuthConfig) -> Result<FlowEngine> {
    let config = Arc::new(config);
    let provider = Arc::new(IdentityClient::new(config.clone())?);
    let store = create_store_from_config(&config.store).await?;
    let sessions = Arc::new(SessionManager::new(&config, provider.clone(), store));
    Ok(FlowEngine::new(
        config,
        provider,
        sessions,
        Arc::new(FlowStateStore::new()),
    ))
}

#[cfg(test)]
mod engine_test {
    include!("engine_test.rs");
}
