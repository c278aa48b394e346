//! Configuration management for AuthFlow
//!
//! A fixed, explicitly validated configuration struct constructed once.
//! Every required field falls back to its environment variable and is
//! checked before the engine starts; a missing credential is fatal at
//! construction time.

use crate::constants::*;
use crate::{AuthFlowError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use url::Url;

/// Session store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Driver name (memory, sqlite)
    pub driver: String,

    /// Data source name / database path (ignored by the memory driver)
    pub dsn: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: STORE_DRIVER_SQLITE.to_string(),
            dsn: default_sqlite_dsn().to_string(),
        }
    }
}

/// TLS material for embedders that serve the auth routes over HTTPS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Complete AuthFlow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity provider domain, e.g. "tenant.auth.example.com".
    /// A scheme prefix is honored (useful against a local test provider);
    /// otherwise https is assumed.
    pub domain: String,

    /// OAuth client id registered with the provider
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Redirect URI the provider calls back to, must match the
    /// registration at the provider
    pub redirect_uri: String,

    /// Secret used to sign session blobs. Holders of this secret can
    /// read and forge sessions; treat it accordingly.
    pub session_secret: String,

    /// Session store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// TLS key/cert paths when the embedder serves HTTPS itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl AuthConfig {
    /// Build a configuration from explicit values, validating every field
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        session_secret: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            session_secret: session_secret.into(),
            store: StoreConfig::default(),
            tls: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the environment, loading `.env` first
    ///
    /// Required: `AUTHFLOW_DOMAIN`, `AUTHFLOW_CLIENT_ID`,
    /// `AUTHFLOW_CLIENT_SECRET`, `AUTHFLOW_REDIRECT_URI`,
    /// `AUTHFLOW_SESSION_SECRET`.
    /// Optional: `AUTHFLOW_STORE_DRIVER`, `AUTHFLOW_STORE_DSN`,
    /// `AUTHFLOW_TLS_CERT`, `AUTHFLOW_TLS_KEY`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let store = StoreConfig {
            driver: env::var(ENV_STORE_DRIVER)
                .unwrap_or_else(|_| STORE_DRIVER_SQLITE.to_string()),
            dsn: env::var(ENV_STORE_DSN).unwrap_or_else(|_| default_sqlite_dsn().to_string()),
        };

        let tls = match (env::var(ENV_TLS_CERT), env::var(ENV_TLS_KEY)) {
            (Ok(cert), Ok(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (Err(_), Err(_)) => None,
            _ => {
                return Err(AuthFlowError::config(format!(
                    "{ENV_TLS_CERT} and {ENV_TLS_KEY} must be set together"
                )));
            }
        };

        let config = Self {
            domain: required_env(ENV_DOMAIN)?,
            client_id: required_env(ENV_CLIENT_ID)?,
            client_secret: required_env(ENV_CLIENT_SECRET)?,
            redirect_uri: required_env(ENV_REDIRECT_URI)?,
            session_secret: required_env(ENV_SESSION_SECRET)?,
            store,
            tls,
        };
        config.validate()?;
        Ok(config)
    }

    /// Select the session store backend
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Base URL of the identity provider, scheme included
    pub fn provider_base_url(&self) -> String {
        if self.domain.starts_with("http://") || self.domain.starts_with("https://") {
            self.domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.domain.trim_end_matches('/'))
        }
    }

    /// Expected `iss` claim of ID tokens from this provider
    pub fn issuer(&self) -> String {
        format!("{}/", self.provider_base_url())
    }

    /// Whether session cookies should carry the Secure flag
    pub fn secure_cookies(&self) -> bool {
        self.redirect_uri.starts_with("https://")
    }

    fn validate(&self) -> Result<()> {
        for (value, name, env_var) in [
            (&self.domain, "domain", ENV_DOMAIN),
            (&self.client_id, "client_id", ENV_CLIENT_ID),
            (&self.client_secret, "client_secret", ENV_CLIENT_SECRET),
            (&self.redirect_uri, "redirect_uri", ENV_REDIRECT_URI),
            (&self.session_secret, "session_secret", ENV_SESSION_SECRET),
        ] {
            if value.trim().is_empty() {
                return Err(AuthFlowError::config(format!(
                    "{name} cannot be empty; it can also be set via {env_var}"
                )));
            }
        }

        Url::parse(&self.redirect_uri)
            .map_err(|e| AuthFlowError::config(format!("redirect_uri is not a valid URL: {e}")))?;
        Url::parse(&self.provider_base_url())
            .map_err(|e| AuthFlowError::config(format!("domain is not a valid host: {e}")))?;

        match self.store.driver.as_str() {
            STORE_DRIVER_MEMORY | STORE_DRIVER_SQLITE => {}
            other => {
                return Err(AuthFlowError::config(format!(
                    "Unknown store driver: {other}. Supported: memory, sqlite"
                )));
            }
        }

        if let Some(tls) = &self.tls {
            for path in [&tls.cert_path, &tls.key_path] {
                if !path.exists() {
                    return Err(AuthFlowError::config(format!(
                        "TLS file does not exist: {}",
                        path.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn required_env(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuthFlowError::config(format!("{name} is required and was not set")))
}
