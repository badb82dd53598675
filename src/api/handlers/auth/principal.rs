//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer token, check its signature and expiry,
//! then resolve its hash to an active, unexpired session. All three checks
//! must hold; any failure is the same bare 401, so callers cannot tell a
//! revoked session from an expired or malformed token. A 401 obliges the
//! client layer to drop its cached credential and re-authenticate.

use axum::http::{HeaderMap, StatusCode};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::session::extract_bearer_token;
use super::state::AuthState;
use super::storage::lookup_session;
use super::token::decode_access_token;
use super::types::Role;
use super::utils::hash_access_token;

/// Authenticated user context derived from the bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Hash of the presented token, used for the `is_current` session flag.
    pub token_hash: Vec<u8>,
}

/// Resolve the bearer token into a principal, or return 401.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<Principal, StatusCode> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Ok(claims) = decode_access_token(auth_state.config().jwt_secret(), &token) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let token_hash = hash_access_token(&token);
    let record = match lookup_session(pool, &token_hash).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // The sid claim and the session row must agree; a mismatch means the
    // token was not minted for this session.
    match claims.session_id() {
        Ok(session_id) if session_id == record.session_id => {}
        _ => return Err(StatusCode::UNAUTHORIZED),
    }

    Ok(Principal {
        user_id: record.user_id,
        session_id: record.session_id,
        email: record.email,
        role: record.role,
        token_hash,
    })
}
