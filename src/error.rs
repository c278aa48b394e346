//! Error types for AuthFlow
//!
//! This module provides the error hierarchy using thiserror. Every
//! externally visible failure maps to an HTTP status and a stable,
//! machine-checkable reason string; provider error bodies are never
//! propagated beyond the display description.

use thiserror::Error;

/// Main error type for AuthFlow operations
#[derive(Error, Debug)]
pub enum AuthFlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State validation failed: {0}")]
    Csrf(String),

    #[error("Invalid callback: {0}")]
    Callback(String),

    #[error("Code exchange rejected: {0}")]
    Exchange(String),

    #[error("Token refresh rejected: {0}")]
    Refresh(String),

    #[error("Token verification failed: {0}")]
    Verification(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Flow timed out: {0}")]
    Timeout(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Convenient result type for AuthFlow operations
pub type Result<T> = std::result::Result<T, AuthFlowError>;

impl From<sqlx::Error> for AuthFlowError {
    fn from(err: sqlx::Error) -> Self {
        AuthFlowError::Storage(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthFlowError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthFlowError::Verification(err.to_string())
    }
}

impl AuthFlowError {
    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Config(msg.into())
    }

    /// Create a CSRF/state error
    #[inline]
    pub fn csrf<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Csrf(msg.into())
    }

    /// Create a callback error
    #[inline]
    pub fn callback<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Callback(msg.into())
    }

    /// Create a code-exchange error
    #[inline]
    pub fn exchange<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Exchange(msg.into())
    }

    /// Create a refresh error
    #[inline]
    pub fn refresh<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Refresh(msg.into())
    }

    /// Create a verification error
    #[inline]
    pub fn verification<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Verification(msg.into())
    }

    /// Create a provider RPC error
    #[inline]
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Provider(msg.into())
    }

    /// Create a storage error
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        AuthFlowError::Storage(msg.into())
    }

    /// HTTP status code this error surfaces as
    pub fn status(&self) -> u16 {
        match self {
            AuthFlowError::Csrf(_) | AuthFlowError::Callback(_) => 400,
            AuthFlowError::Exchange(_)
            | AuthFlowError::Refresh(_)
            | AuthFlowError::Verification(_)
            | AuthFlowError::SessionExpired(_)
            | AuthFlowError::SessionNotFound(_) => 401,
            AuthFlowError::Timeout(_) => 408,
            AuthFlowError::Provider(_) | AuthFlowError::Network(_) => 502,
            AuthFlowError::Config(_)
            | AuthFlowError::Storage(_)
            | AuthFlowError::Json(_)
            | AuthFlowError::Io(_)
            | AuthFlowError::Other(_) => 500,
        }
    }

    /// Stable machine-checkable reason string
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFlowError::Config(_) => "config_error",
            AuthFlowError::Csrf(_) => "invalid_state",
            AuthFlowError::Callback(_) => "invalid_callback",
            AuthFlowError::Exchange(_) => "exchange_failed",
            AuthFlowError::Refresh(_) => "reauthentication_required",
            AuthFlowError::Verification(_) => "invalid_token",
            AuthFlowError::SessionExpired(_) => "session_expired",
            AuthFlowError::SessionNotFound(_) => "session_not_found",
            AuthFlowError::Timeout(_) => "flow_timeout",
            AuthFlowError::Provider(_) => "provider_error",
            AuthFlowError::Storage(_) => "storage_error",
            AuthFlowError::Network(_) => "network_error",
            AuthFlowError::Json(_) => "encoding_error",
            AuthFlowError::Io(_) => "io_error",
            AuthFlowError::Other(_) => "internal_error",
        }
    }
}
