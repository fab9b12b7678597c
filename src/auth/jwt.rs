//! User JWT minting and validation
//!
//! Tokens are signed with HS256 and validated against that algorithm only,
//! so a token re-signed under a different algorithm never verifies.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Issuer claim placed into every token
pub const ISSUER: &str = "lark";

/// How long a generated token is valid (24h)
const TOKEN_VALIDITY_SECS: i64 = 60 * 60 * 24;

/// Claims carried by a user session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Application-internal user identifier
    pub id: String,

    /// User's primary email address
    pub email: String,

    /// Issuing service
    pub iss: String,

    /// Subject, equal to the user id
    pub sub: String,

    /// Expiry as unix seconds
    pub exp: i64,

    /// Issued-at as unix seconds
    pub iat: i64,
}

impl UserClaims {
    /// Create claims for the given user, valid from now
    #[must_use]
    pub fn new(id: &str, email: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: id.to_string(),
            email: email.to_string(),
            iss: ISSUER.to_string(),
            sub: id.to_string(),
            exp: now + TOKEN_VALIDITY_SECS,
            iat: now,
        }
    }
}

/// Sign the claims into a compact JWT
///
/// # Errors
///
/// Returns error if signing fails
pub fn generate(secret: &[u8], claims: &UserClaims) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| Error::Internal(format!("failed to sign JWT: {e}")))
}

/// Parse and validate a JWT, accepting only HS256
///
/// # Errors
///
/// Returns error if the signature, algorithm or expiry is invalid
pub fn verify(secret: &[u8], token: &str) -> Result<UserClaims> {
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| Error::Auth(format!("invalid JWT: {e}")))?;

    Ok(data.claims)
}
