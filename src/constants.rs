//! Constants used throughout AuthFlow
//!
//! This module contains all constant values used by the engine, including
//! environment variable names, flow budgets, and cookie transport limits.

use once_cell::sync::Lazy;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Get the home directory with fallback to current directory
pub fn get_home_dir() -> &'static str {
    static HOME_DIR: Lazy<String> = Lazy::new(|| {
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string())
    });
    &HOME_DIR
}

/// Default config directory (~/.authflow)
pub fn default_config_dir() -> &'static str {
    static CONFIG_DIR: Lazy<String> = Lazy::new(|| format!("{}/.authflow", get_home_dir()));
    &CONFIG_DIR
}

/// Default SQLite DSN for the session store (~/.authflow/sessions.db)
pub fn default_sqlite_dsn() -> &'static str {
    static SQLITE_DSN: Lazy<String> = Lazy::new(|| format!("{}/sessions.db", default_config_dir()));
    &SQLITE_DSN
}

/// Environment variable: identity provider domain
pub const ENV_DOMAIN: &str = "AUTHFLOW_DOMAIN";

/// Environment variable: OAuth client id
pub const ENV_CLIENT_ID: &str = "AUTHFLOW_CLIENT_ID";

/// Environment variable: OAuth client secret
pub const ENV_CLIENT_SECRET: &str = "AUTHFLOW_CLIENT_SECRET";

/// Environment variable: redirect URI for the authorization callback
pub const ENV_REDIRECT_URI: &str = "AUTHFLOW_REDIRECT_URI";

/// Environment variable: session blob signing secret
pub const ENV_SESSION_SECRET: &str = "AUTHFLOW_SESSION_SECRET";

/// Environment variable: TLS certificate path (optional, HTTPS serving)
pub const ENV_TLS_CERT: &str = "AUTHFLOW_TLS_CERT";

/// Environment variable: TLS private key path (optional, HTTPS serving)
pub const ENV_TLS_KEY: &str = "AUTHFLOW_TLS_KEY";

/// Environment variable: session store driver (memory, sqlite)
pub const ENV_STORE_DRIVER: &str = "AUTHFLOW_STORE_DRIVER";

/// Environment variable: session store DSN
pub const ENV_STORE_DSN: &str = "AUTHFLOW_STORE_DSN";

/// Storage driver: in-memory
pub const STORE_DRIVER_MEMORY: &str = "memory";

/// Storage driver: SQLite
pub const STORE_DRIVER_SQLITE: &str = "sqlite";

// ============================================================================
// FLOWS
// ============================================================================

/// Scope requested when a login flow does not specify one
pub const DEFAULT_LOGIN_SCOPE: &str = "openid profile email";

/// Seconds a login initiator waits for the callback before timing out
pub const LOGIN_TIMEOUT_SECS: u64 = 120;

/// Seconds a link/unlink initiator waits for the callback before timing out
pub const LINK_TIMEOUT_SECS: u64 = 60;

/// Scope that requests an account-link consent at the provider
pub const SCOPE_LINK_ACCOUNT: &str = "link_account";

/// Scope that requests an account-unlink consent at the provider
pub const SCOPE_UNLINK_ACCOUNT: &str = "unlink_account";

/// Audience of the provider's account-management resource server,
/// used by link/unlink pushed authorization requests
pub const LINKING_AUDIENCE: &str = "my-account";

/// `authorization_details` type for account-link requests
pub const AUTHZ_DETAIL_LINK_ACCOUNT: &str = "link_account";

// ============================================================================
// TOKENS & SESSIONS
// ============================================================================

/// Buffer subtracted from access-token expiry before a token counts as
/// expired, so callers never receive a token about to lapse mid-request
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

/// Fallback session freshness window when a token response carries
/// neither an ID token nor an access-token expiry
pub const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Maximum transient-failure retries for a refresh RPC
pub const REFRESH_RETRY_MAX: u32 = 2;

/// Base backoff between refresh retries, in milliseconds
pub const REFRESH_RETRY_BACKOFF_MS: u64 = 250;

// ============================================================================
// COOKIES
// ============================================================================

/// Session cookie name prefix; chunked cookies append `_<index>`
pub const SESSION_COOKIE_NAME: &str = "__session_data";

/// Maximum bytes of blob carried per cookie chunk
pub const MAX_COOKIE_CHUNK_BYTES: usize = 4096;

/// Path scope for all session cookies
pub const COOKIE_PATH: &str = "/auth";

// ============================================================================
// HTTP ROUTES
// ============================================================================

/// Route: start a login flow (redirects to the provider)
pub const AUTH_PATH_LOGIN: &str = "/auth/login";

/// Route: authorization callback delivered by the provider
pub const AUTH_PATH_CALLBACK: &str = "/auth/callback";

/// Route: current user profile from the session cookie
pub const AUTH_PATH_GET_USER: &str = "/auth/get_user";

/// Route: access token for an audience/scope/connection
pub const AUTH_PATH_GET_TOKEN: &str = "/auth/get_token";

/// Route: revoke and clear the session
pub const AUTH_PATH_LOGOUT: &str = "/auth/logout";
