//! Access token minting and decoding.
//!
//! Tokens are HS256 JWTs carrying the user id, the session id, and the role.
//! A structurally valid token is never enough on its own: every request is
//! also checked against the session registry, which is what makes tokens
//! revocable before their `exp`.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::Role;

/// Claims embedded in every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: String,
    /// Session id, paired 1:1 with a `user_sessions` row.
    pub sid: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub(crate) fn new(user_id: Uuid, session_id: Uuid, role: Role, ttl_seconds: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            role,
            iat: now,
            exp: now + ttl_seconds,
        }
    }

    pub(crate) fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).context("invalid sub claim")
    }

    pub(crate) fn session_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sid).context("invalid sid claim")
    }
}

/// Mint a signed access token for the given claims.
///
/// # Errors
/// Returns an error if encoding fails.
pub(crate) fn mint_access_token(secret: &SecretString, claims: &AccessClaims) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .context("failed to sign access token")
}

/// Decode and validate a token's signature, structure, and expiry.
///
/// Any failure collapses to one error; callers must not distinguish a bad
/// signature from an expired or malformed token.
pub(crate) fn decode_access_token(secret: &SecretString, token: &str) -> Result<AccessClaims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .context("invalid access token")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("test-signing-secret".to_string())
    }

    #[test]
    fn mint_and_decode_round_trip() -> Result<()> {
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let claims = AccessClaims::new(user_id, session_id, Role::Manager, 3600);
        let token = mint_access_token(&secret(), &claims)?;

        let decoded = decode_access_token(&secret(), &token)?;
        assert_eq!(decoded.user_id()?, user_id);
        assert_eq!(decoded.session_id()?, session_id);
        assert_eq!(decoded.role, Role::Manager);
        assert_eq!(decoded.exp - decoded.iat, 3600);
        Ok(())
    }

    #[test]
    fn decode_rejects_expired_token() -> Result<()> {
        // Past the default decode leeway, not just past exp.
        let claims = AccessClaims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Customer, -120);
        let token = mint_access_token(&secret(), &claims)?;
        assert!(decode_access_token(&secret(), &token).is_err());
        Ok(())
    }

    #[test]
    fn decode_rejects_wrong_secret() -> Result<()> {
        let claims = AccessClaims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Customer, 3600);
        let token = mint_access_token(&secret(), &claims)?;
        let other = SecretString::from("other-secret".to_string());
        assert!(decode_access_token(&other, &token).is_err());
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_token() {
        assert!(decode_access_token(&secret(), "not.a.jwt").is_err());
        assert!(decode_access_token(&secret(), "").is_err());
    }

    #[test]
    fn claims_reject_garbage_ids() {
        let claims = AccessClaims {
            sub: "not-a-uuid".to_string(),
            sid: "also-not".to_string(),
            role: Role::Customer,
            iat: 0,
            exp: 0,
        };
        assert!(claims.user_id().is_err());
        assert!(claims.session_id().is_err());
    }
}
