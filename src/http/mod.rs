//! HTTP route contracts for the auth surface
//!
//! Builds the axum `Router` exposing `/auth/login`, `/auth/callback`,
//! `/auth/get_user`, `/auth/get_token`, and `/auth/logout` for the
//! embedding application to mount. The listener itself (bind, TLS
//! termination) belongs to the embedder; these handlers only drive the
//! engine and translate its results into redirects, cookies, and JSON.

use crate::codec::SessionClaims;
use crate::constants::{
    AUTH_PATH_CALLBACK, AUTH_PATH_GET_TOKEN, AUTH_PATH_GET_USER, AUTH_PATH_LOGIN,
    AUTH_PATH_LOGOUT, MAX_COOKIE_CHUNK_BYTES,
};
use crate::cookie;
use crate::flow::engine::{FlowEngine, LoginParams};
use crate::session::AccessTokenOutcome;
use crate::{AuthFlowError, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    engine: Arc<FlowEngine>,
}

impl AppState {
    /// Wrap an engine for the router
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this router
    pub fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }
}

/// Error type for HTTP handlers
///
/// Maps the engine's error taxonomy onto its HTTP status and stable
/// reason string; raw provider error bodies never reach the response
/// beyond the display description.
#[derive(Debug)]
pub struct AppError(AuthFlowError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let reason = self.0.reason();
        let message = self.0.to_string();

        if status.is_server_error() {
            tracing::error!(reason, %status, "auth request failed: {message}");
        } else {
            tracing::debug!(reason, %status, "auth request rejected: {message}");
        }

        let body = json!({
            "error": {
                "type": reason,
                "message": message,
                "status": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<AuthFlowError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Create the auth routes
pub fn create_auth_routes(state: AppState) -> Router {
    Router::new()
        .route(AUTH_PATH_LOGIN, get(handle_login))
        .route(AUTH_PATH_CALLBACK, get(handle_callback))
        .route(AUTH_PATH_GET_USER, get(handle_get_user))
        .route(AUTH_PATH_GET_TOKEN, get(handle_get_token))
        .route(AUTH_PATH_LOGOUT, get(handle_logout))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    #[serde(default)]
    return_to: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    connection: Option<String>,
    #[serde(default)]
    audience: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    connection: Option<String>,
}

/// Start a login flow, or short-circuit when a valid session cookie is
/// already present
async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> std::result::Result<Response, AppError> {
    if let Ok(Some(claims)) = session_from_cookies(&state, &headers)
        && claims.is_fresh(Utc::now())
    {
        return Ok(Json(json!({
            "message": "already logged in",
            "user_id": claims.sub,
        }))
        .into_response());
    }

    let (_, authorize_url) = state.engine.begin_login(&LoginParams {
        connection: query.connection,
        scope: query.scope,
        audience: query.audience,
        return_to: query.return_to,
        extra: Vec::new(),
    })?;

    Ok(redirect(authorize_url.as_str()))
}

/// Provider callback: completes the pending flow and sets the session
/// cookies
async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> std::result::Result<Response, AppError> {
    let outcome = state.engine.handle_callback(&params).await?;

    let expires_at = Utc::now() + chrono::Duration::seconds(outcome.expires_in as i64);
    let cookies = cookie::session_cookies(
        &outcome.session_blob,
        MAX_COOKIE_CHUNK_BYTES,
        expires_at,
        state.engine.config().secure_cookies(),
    );

    let mut builder = match &outcome.return_to {
        Some(target) => Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, target),
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json"),
    };
    for cookie_value in &cookies {
        builder = builder.header(header::SET_COOKIE, cookie_value);
    }

    let body = match outcome.return_to {
        Some(_) => axum::body::Body::empty(),
        None => axum::body::Body::from(
            json!({"message": "successful. you can now close this window"}).to_string(),
        ),
    };

    builder
        .body(body)
        .map_err(|e| AppError(AuthFlowError::Other(anyhow::anyhow!(e))))
}

/// Current user's profile and linked connections from the session cookie
async fn handle_get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, AppError> {
    let claims = session_from_cookies(&state, &headers)?.ok_or_else(|| {
        AuthFlowError::SessionNotFound("missing session cookie".to_string())
    })?;

    // A replayed cookie for a logged-out or revoked session is rejected
    // even though its signature still verifies
    let sessions = state.engine.sessions();
    if sessions.current_blob(&claims.sub).await?.is_none() {
        return Err(AppError(AuthFlowError::SessionNotFound(format!(
            "no stored session for {}",
            claims.sub
        ))));
    }

    if claims.is_fresh(Utc::now()) {
        return Ok(Json(user_response(&claims)).into_response());
    }

    // Stale cookie: refresh transparently (or fail with 401) and hand the
    // browser fresh cookies
    let payload = sessions.get_session(&claims.sub).await?;
    let blob = sessions
        .current_blob(&claims.sub)
        .await?
        .ok_or_else(|| AuthFlowError::SessionNotFound(format!("no session for {}", claims.sub)))?;

    let expires_at = payload.freshness_marker().unwrap_or_else(Utc::now);
    let cookies = cookie::session_cookies(
        &blob,
        MAX_COOKIE_CHUNK_BYTES,
        expires_at,
        state.engine.config().secure_cookies(),
    );

    let refreshed = SessionClaims {
        sub: claims.sub.clone(),
        iat: Utc::now().timestamp(),
        exp: expires_at.timestamp(),
        session: payload,
    };
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json");
    for cookie_value in &cookies {
        builder = builder.header(header::SET_COOKIE, cookie_value);
    }
    builder
        .body(axum::body::Body::from(user_response(&refreshed).to_string()))
        .map_err(|e| AppError(AuthFlowError::Other(anyhow::anyhow!(e))))
}

/// Access token for an audience/scope, a federated upstream token for a
/// connection, or a redirect when reauthorization is required
async fn handle_get_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> std::result::Result<Response, AppError> {
    let claims = session_from_cookies(&state, &headers)?.ok_or_else(|| {
        AuthFlowError::SessionNotFound("missing session cookie".to_string())
    })?;

    // A connection parameter selects a federated upstream token for a
    // linked account instead of a provider-audience token
    if let Some(connection) = &query.connection {
        let refresh_token = claims.session.refresh_token.clone().ok_or_else(|| {
            AuthFlowError::refresh("no refresh token available for federated exchange")
        })?;
        let token = state
            .engine
            .provider()
            .federated_token(connection, &refresh_token, query.scope.as_deref())
            .await?;
        return Ok(Json(json!({
            "connection": connection,
            "access_token": token.access_token,
            "scope": token.scope,
            "expires_in": token.expires_in,
        }))
        .into_response());
    }

    let audience = query
        .audience
        .clone()
        .unwrap_or_else(|| state.engine.provider().default_audience());

    let outcome = state
        .engine
        .sessions()
        .get_access_token(&claims.sub, &audience, query.scope.as_deref())
        .await?;

    match outcome {
        AccessTokenOutcome::Token(record) => Ok(Json(json!({
            "audience": record.audience,
            "access_token": record.access_token,
            "scope": record.scope,
            "expires_at": record.expires_at,
        }))
        .into_response()),
        AccessTokenOutcome::NeedsReauthorization => {
            let (_, authorize_url) = state.engine.begin_login(&LoginParams {
                audience: Some(audience),
                scope: query.scope,
                ..Default::default()
            })?;
            Ok(redirect(authorize_url.as_str()))
        }
    }
}

/// Revoke at the provider, delete the stored session, clear the cookies
async fn handle_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, AppError> {
    let claims = session_from_cookies(&state, &headers)?.ok_or_else(|| {
        AuthFlowError::SessionNotFound("missing session cookie".to_string())
    })?;

    state.engine.sessions().logout(&claims.sub).await?;

    let names = cookie_header(&headers)
        .map(cookie::session_cookie_names)
        .unwrap_or_default();
    let cleared = cookie::clear_cookies(names, state.engine.config().secure_cookies());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json");
    for cookie_value in &cleared {
        builder = builder.header(header::SET_COOKIE, cookie_value);
    }
    builder
        .body(axum::body::Body::from(
            json!({"message": "logged out"}).to_string(),
        ))
        .map_err(|e| AppError(AuthFlowError::Other(anyhow::anyhow!(e))))
}

fn redirect(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(axum::body::Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
}

/// Reassemble and verify the session cookie
///
/// No chunks at all is the normal "not logged in" case (`Ok(None)`); a
/// present cookie that fails signature verification is a hard error.
fn session_from_cookies(state: &AppState, headers: &HeaderMap) -> Result<Option<SessionClaims>> {
    let Some(header_value) = cookie_header(headers) else {
        return Ok(None);
    };
    let Some(blob) = cookie::reconstruct(cookie::collect_session_chunks(header_value)) else {
        return Ok(None);
    };
    state.engine.sessions().decode_blob(&blob).map(Some)
}

fn user_response(claims: &SessionClaims) -> serde_json::Value {
    json!({
        "user_id": claims.sub,
        "user": claims.session.user,
        "linked_connections": claims.session.linked_connections,
    })
}
