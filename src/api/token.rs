//! Stateless access tokens.
//!
//! Tokens are HS256 JWTs carrying the subject username and an absolute
//! expiry. Validity is determined purely by signature and expiry — there
//! is no revocation list, so an issued token stays valid until it
//! expires.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject username. Optional on decode so that a structurally valid
    /// token without a subject is distinguishable from a malformed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Absolute expiry, unix seconds.
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Malformed,
    #[error("Invalid token")]
    MissingSubject,
}

/// Sign a token for `username` expiring `ttl` from now.
pub fn issue(username: &str, secret: &str, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: Some(username.to_string()),
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a token and return its subject.
///
/// Checks signature integrity first, then expiry, then that a subject
/// claim is present. Expiry is enforced with zero leeway.
pub fn verify(token: &str, secret: &str) -> Result<String, TokenError> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    })?;

    match data.claims.sub {
        Some(sub) if !sub.is_empty() => Ok(sub),
        _ => Err(TokenError::MissingSubject),
    }
}
