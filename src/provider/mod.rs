//! Identity provider client
//!
//! Thin RPC facade over the identity provider: authorize-URL
//! construction, authorization-code exchange, refresh, pushed
//! authorization requests, token revocation, userinfo, federated token
//! exchange, and ID-token signature verification against the provider's
//! published JWKS.
//!
//! Authorization codes are single-use, so code exchange is never retried.
//! Refresh RPCs retry transient transport failures a bounded number of
//! times; a provider rejection is surfaced immediately as a typed error.

use crate::config::AuthConfig;
use crate::constants::{REFRESH_RETRY_BACKOFF_MS, REFRESH_RETRY_MAX};
use crate::model::{FederatedToken, ParResponse, TokenResponse};
use crate::{AuthFlowError, Result};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    ExtraTokenFields, RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardTokenResponse,
    TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Token-exchange grant type for federated connection access tokens
const GRANT_TYPE_FEDERATED: &str =
    "urn:auth0:params:oauth:grant-type:token-exchange:federated-connection-access-token";

/// Subject token type presented during federated token exchange
const SUBJECT_TOKEN_TYPE_REFRESH: &str = "urn:ietf:params:oauth:token-type:refresh_token";

/// Requested token type for federated connection access tokens
const REQUESTED_TOKEN_TYPE_FEDERATED: &str =
    "http://auth0.com/oauth/token-type/federated-connection-access-token";

/// Extra token-endpoint fields beyond the OAuth2 standard set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type ProviderTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type ProviderClient = oauth2::Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Parameters for building an authorization redirect URL
#[derive(Debug, Clone, Default)]
pub struct AuthorizeParams {
    pub state: String,
    pub connection: Option<String>,
    pub scope: Option<String>,
    pub audience: Option<String>,
    /// Provider-specific parameters passed through verbatim, in order
    pub extra: Vec<(String, String)>,
}

/// RPC facade to the identity provider
pub struct IdentityClient {
    config: Arc<AuthConfig>,
    http_client: reqwest::Client,
    jwks_cache: RwLock<Option<jwk::JwkSet>>,
}

impl IdentityClient {
    /// Create a new provider client
    pub fn new(config: Arc<AuthConfig>) -> Result<Self> {
        // Disable redirects to prevent authorization code interception
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthFlowError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            jwks_cache: RwLock::new(None),
        })
    }

    /// Default audience used when a token response does not name one:
    /// the provider's own userinfo endpoint
    pub fn default_audience(&self) -> String {
        format!("{}/userinfo", self.config.provider_base_url())
    }

    /// Build the authorization redirect URL
    ///
    /// Query construction is deterministic; unknown extra parameters pass
    /// through verbatim as an escape hatch for provider-specific
    /// parameters.
    pub fn build_authorize_url(&self, params: &AuthorizeParams) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/authorize", self.config.provider_base_url()))
            .map_err(|e| AuthFlowError::config(format!("invalid authorize URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("state", &params.state);
            if let Some(connection) = &params.connection {
                query.append_pair("connection", connection);
            }
            if let Some(scope) = &params.scope {
                query.append_pair("scope", scope);
            }
            if let Some(audience) = &params.audience {
                query.append_pair("audience", audience);
            }
            for (key, value) in &params.extra {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Build the authorization redirect URL for a pushed authorization
    /// request, referencing the registered `request_uri`
    pub fn build_authorize_par_url(&self, state: &str, request_uri: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/authorize", self.config.provider_base_url()))
            .map_err(|e| AuthFlowError::config(format!("invalid authorize URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("state", state)
            .append_pair("request_uri", request_uri);
        Ok(url)
    }

    /// Exchange an authorization code for tokens
    ///
    /// Never retried: authorization codes are single-use server-side.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let client = self.oauth_client()?;

        let token_result = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| AuthFlowError::exchange(format!("code exchange failed: {e}")))?;

        Ok(Self::into_token_response(token_result))
    }

    /// Refresh an access token using the stored refresh token
    ///
    /// A provider rejection means the refresh token is invalid and is
    /// never retried; transient transport failures are retried with
    /// backoff.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse> {
        let client = self.oauth_client()?;
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let mut attempt = 0;
        loop {
            let mut request = client.exchange_refresh_token(&refresh_token);
            if let Some(scope) = scope {
                request = request.add_scope(Scope::new(scope.to_string()));
            }

            match request.request_async(&self.http_client).await {
                Ok(token_result) => return Ok(Self::into_token_response(token_result)),
                Err(RequestTokenError::Request(e)) if attempt < REFRESH_RETRY_MAX => {
                    attempt += 1;
                    let backoff = REFRESH_RETRY_BACKOFF_MS * (1 << attempt);
                    tracing::warn!(
                        "transient refresh failure (attempt {attempt}), retrying in {backoff}ms: {e}"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    return Err(AuthFlowError::refresh(format!("token refresh failed: {e}")));
                }
            }
        }
    }

    /// Verify an ID token against the provider's published keys
    ///
    /// Validates signature, issuer, audience, and expiry. Fails closed on
    /// any verification problem; partially-trusted claims are never
    /// returned.
    pub async fn verify_id_token(
        &self,
        raw: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let header = decode_header(raw)
            .map_err(|e| AuthFlowError::verification(format!("malformed ID token: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthFlowError::verification("ID token header missing kid"))?;

        let key = self.find_jwk(&kid).await?;
        let decoding_key = DecodingKey::from_jwk(&key)
            .map_err(|e| AuthFlowError::verification(format!("unusable JWKS key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.client_id.as_str()]);

        let data = decode::<serde_json::Map<String, serde_json::Value>>(
            raw,
            &decoding_key,
            &validation,
        )
        .map_err(|e| AuthFlowError::verification(format!("ID token rejected: {e}")))?;
        Ok(data.claims)
    }

    /// Revoke a refresh token at the provider
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let response = self
            .http_client
            .post(format!("{}/oauth/revoke", self.config.provider_base_url()))
            .json(&serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "token": refresh_token,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthFlowError::provider(format!(
                "revocation rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Register authorization parameters at the provider, keeping them
    /// off the browser URL, and return the `request_uri` to redirect with
    pub async fn push_authorization_request(
        &self,
        params: &[(String, String)],
    ) -> Result<ParResponse> {
        let mut form: Vec<(&str, String)> = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        for (key, value) in params {
            form.push((key.as_str(), value.clone()));
        }

        let response = self
            .http_client
            .post(format!("{}/oauth/par", self.config.provider_base_url()))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthFlowError::provider(format!(
                "pushed authorization request rejected with status {}",
                response.status()
            )));
        }
        Ok(response.json::<ParResponse>().await?)
    }

    /// Fetch the user profile for an access token
    pub async fn get_userinfo(
        &self,
        access_token: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let response = self
            .http_client
            .get(format!("{}/userinfo", self.config.provider_base_url()))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthFlowError::provider(format!(
                "userinfo rejected with status {}",
                response.status()
            )));
        }
        Ok(response
            .json::<serde_json::Map<String, serde_json::Value>>()
            .await?)
    }

    /// Exchange the refresh token for an upstream access token of a
    /// linked federated connection (e.g. a linked GitHub account)
    pub async fn federated_token(
        &self,
        connection: &str,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<FederatedToken> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", GRANT_TYPE_FEDERATED.to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("subject_token_type", SUBJECT_TOKEN_TYPE_REFRESH.to_string()),
            ("subject_token", refresh_token.to_string()),
            (
                "requested_token_type",
                REQUESTED_TOKEN_TYPE_FEDERATED.to_string(),
            ),
            ("connection", connection.to_string()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.to_string()));
        }

        let response = self
            .http_client
            .post(format!("{}/oauth/token", self.config.provider_base_url()))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthFlowError::provider(format!(
                "federated token exchange rejected with status {}",
                response.status()
            )));
        }
        Ok(response.json::<FederatedToken>().await?)
    }

    /// Best-effort read of a JWT-shaped access token's `aud` claim,
    /// without verifying it
    ///
    /// Used only to pick the cache key for an AccessTokenRecord; opaque
    /// access tokens yield `None`.
    pub fn peek_unverified_audience(access_token: &str) -> Option<String> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<serde_json::Map<String, serde_json::Value>>(
            access_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .ok()?;

        match data.claims.get("aud") {
            Some(serde_json::Value::String(aud)) => Some(aud.clone()),
            Some(serde_json::Value::Array(auds)) => auds
                .first()
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }

    /// Build the oauth2 client for token-endpoint RPCs
    fn oauth_client(&self) -> Result<ProviderClient> {
        let base = self.config.provider_base_url();
        let client = oauth2::Client::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(format!("{base}/authorize"))
                    .map_err(|e| AuthFlowError::config(format!("invalid auth URL: {e}")))?,
            )
            .set_token_uri(
                TokenUrl::new(format!("{base}/oauth/token"))
                    .map_err(|e| AuthFlowError::config(format!("invalid token URL: {e}")))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(self.config.redirect_uri.clone())
                    .map_err(|e| AuthFlowError::config(format!("invalid redirect URI: {e}")))?,
            );
        Ok(client)
    }

    fn into_token_response(token_result: ProviderTokenResponse) -> TokenResponse {
        use oauth2::TokenResponse as _;

        TokenResponse {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
            id_token: token_result.extra_fields().id_token.clone(),
            scope: token_result.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
            expires_in: token_result
                .expires_in()
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    async fn find_jwk(&self, kid: &str) -> Result<jwk::Jwk> {
        if let Some(cached) = self.jwks_cache.read().as_ref()
            && let Some(key) = cached.find(kid)
        {
            return Ok(key.clone());
        }

        // Unknown kid: the provider may have rotated keys, refetch once
        let set = self.fetch_jwks().await?;
        let found = set.find(kid).cloned();
        *self.jwks_cache.write() = Some(set);

        found.ok_or_else(|| {
            AuthFlowError::verification(format!("no published key matches kid '{kid}'"))
        })
    }

    async fn fetch_jwks(&self) -> Result<jwk::JwkSet> {
        let url = format!(
            "{}/.well-known/jwks.json",
            self.config.provider_base_url()
        );
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AuthFlowError::verification(format!(
                "JWKS fetch failed with status {}",
                response.status()
            )));
        }
        Ok(response.json::<jwk::JwkSet>().await?)
    }
}

#[cfg(test)]
mod provider_test;
