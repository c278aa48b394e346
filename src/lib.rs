//! AuthFlow - embeddable OIDC session and token lifecycle engine
//!
//! This library drives multi-step, externally-redirected authentication
//! flows (OIDC/OAuth2 authorization-code) to completion and manages the
//! resulting credentials per user:
//! - Login, account-link, and account-unlink flows with one-time state
//!   tokens and CSRF-safe callback correlation
//! - Signed, tamper-evident session blobs with per-audience access token
//!   records, transparent refresh, and single-flight refresh per user
//! - Chunked session-cookie transport for oversized blobs
//! - An axum router exposing the `/auth/*` route contracts for the
//!   embedding application to mount
//!
//! # Example
//!
//! ```rust,no_run
//! use authflow::config::AuthConfig;
//! use authflow::engine::build_engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::from_env()?;
//!     let engine = build_engine(config).await?;
//!
//!     let pending = engine.start_login(None, None).await?;
//!     println!("navigate here: {}", pending.authorize_url());
//!     let resolution = pending.wait().await;
//!     println!("{:?}", resolution);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Session and token lifecycle
pub mod codec;
pub mod cookie;
pub mod flow;
pub mod provider;
pub mod session;

// Infrastructure
pub mod config;
pub mod store;

// Interface layer
pub mod http;

// Re-exports for convenience
pub use config::AuthConfig;
pub use error::{AuthFlowError, Result};
pub use flow::engine::{self as engine, FlowEngine, FlowResolution, PendingFlow};
pub use model::{AccessTokenRecord, FlowKind, FlowRecord, SessionPayload};
pub use session::SessionManager;

/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "authflow=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
