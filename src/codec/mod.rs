//! Signed session blob codec
//!
//! Encodes the session payload into a tamper-evident HS256 JWT and
//! verifies it on the way back. The blob is integrity-protected, not
//! confidential: anyone holding the signing secret can read and forge
//! sessions.
//!
//! Expiry is carried in the claims but deliberately not enforced here;
//! the session manager decides between "expired, delete" and "stale,
//! refresh" based on whether a refresh token exists.

use crate::constants::DEFAULT_SESSION_TTL_SECS;
use crate::model::SessionPayload;
use crate::{AuthFlowError, Result};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims wrapped around the session payload in the signed blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the user this session belongs to
    pub sub: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Freshness marker, seconds since epoch
    pub exp: i64,
    /// The session payload itself
    pub session: SessionPayload,
}

impl SessionClaims {
    /// Whether the freshness marker is still in the future
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.exp > now.timestamp()
    }

    /// Freshness marker as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Encoder/decoder for signed session blobs
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    /// Create a codec from the session signing secret
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a session payload into a compact blob
    ///
    /// The embedded expiry is the payload's freshness marker: ID-token
    /// expiry when present, newest access-token expiry otherwise, or a
    /// default TTL when the payload has neither.
    pub fn encode(&self, user_id: &str, payload: &SessionPayload) -> Result<String> {
        let now = Utc::now();
        let exp = payload
            .freshness_marker()
            .unwrap_or_else(|| now + chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS));

        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            session: payload.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthFlowError::verification(format!("failed to sign session: {e}")))
    }

    /// Verify a blob's signature and return its claims
    ///
    /// Fails closed on any signature or structure problem. The embedded
    /// expiry is returned, not enforced.
    pub fn decode(&self, blob: &str) -> Result<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<SessionClaims>(blob, &self.decoding_key, &validation)
            .map_err(|e| AuthFlowError::verification(format!("invalid session blob: {e}")))?;
        Ok(data.claims)
    }
}
