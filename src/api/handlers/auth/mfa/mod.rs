//! Multi-factor authentication with email challenge codes.
//!
//! Flow Overview:
//! 1) Enable re-authenticates the password, stores a shared secret, and
//!    issues a first challenge code so the user can confirm delivery.
//! 2) A login (or gated identity exchange) that hits an MFA-enabled account
//!    without a code issues a fresh challenge; the new code supersedes any
//!    outstanding one atomically.
//! 3) Verification is single-use: a consumed code replays as invalid.
//! 4) Disable re-authenticates the password and clears flag, secret, and
//!    any outstanding code.
//!
//! Codes travel through the email outbox; delivery failure never
//! invalidates a code, and no lock is held across delivery.

pub(crate) mod storage;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    codes::{evaluate, CodeOutcome},
    password::verify_password_or_dummy,
    principal::require_auth,
    state::{AuthConfig, AuthState},
    storage::{enqueue_email, lookup_user_by_id, record_audit_event, UserRecord},
    types::{Ack, MfaDisableRequest, MfaEnableRequest, MfaEnableResponse, MfaVerifyRequest},
    utils::{generate_mfa_secret, generate_numeric_code, hash_code},
};
use self::storage::{consume_code, delete_codes, load_code, set_mfa, upsert_code};

const EMAIL_TEMPLATE_MFA_CODE: &str = "mfa_code";

/// Issue a fresh challenge code for the user, superseding any prior one,
/// and enqueue its delivery in the same transaction.
pub(crate) async fn issue_verify_code(
    pool: &PgPool,
    config: &AuthConfig,
    user: &UserRecord,
) -> Result<()> {
    let code = generate_numeric_code(config.mfa_code_length());
    let code_hash = hash_code(&code);

    let mut tx = pool.begin().await.context("begin MFA issue transaction")?;
    upsert_code(&mut tx, user.id, &code_hash, config.mfa_code_ttl_seconds()).await?;

    let payload = json!({
        "email": user.email,
        "code": code,
        "expires_minutes": config.mfa_code_ttl_seconds() / 60,
    });
    let payload_text = serde_json::to_string(&payload).context("serialize MFA email payload")?;
    enqueue_email(&mut tx, &user.email, EMAIL_TEMPLATE_MFA_CODE, &payload_text).await?;

    tx.commit().await.context("commit MFA issue transaction")?;
    Ok(())
}

/// Verify and consume a challenge code.
pub(crate) async fn verify_code(pool: &PgPool, user_id: Uuid, code: &str) -> Result<CodeOutcome> {
    let supplied_hash = hash_code(code.trim());
    let row = load_code(pool, user_id).await?;

    match evaluate(row.as_ref(), &supplied_hash, Utc::now()) {
        CodeOutcome::Verified => {
            // The conditional update is the authority; losing the race to a
            // concurrent verify downgrades to invalid.
            if consume_code(pool, user_id, &supplied_hash).await? {
                Ok(CodeOutcome::Verified)
            } else {
                Ok(CodeOutcome::CodeInvalid)
            }
        }
        outcome => Ok(outcome),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/enable",
    request_body = MfaEnableRequest,
    responses(
        (status = 200, description = "MFA enabled", body = MfaEnableResponse),
        (status = 400, description = "Invalid password", body = String),
        (status = 401, description = "Unauthorized")
    ),
    tag = "mfa"
)]
pub async fn enable_mfa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaEnableRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let request: MfaEnableRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let user = match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for MFA enable: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Password re-entry, so a hijacked session cannot silently add a factor.
    if !verify_password_or_dummy(&request.password, user.password_hash.as_deref()) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let secret = match generate_mfa_secret() {
        Ok(secret) => secret,
        Err(err) => {
            error!("Failed to generate MFA secret: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = set_mfa(&pool, user.id, true, Some(&secret)).await {
        error!("Failed to enable MFA: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // First challenge code confirms delivery works before the user relies
    // on it at login.
    if let Err(err) = issue_verify_code(&pool, auth_state.config(), &user).await {
        error!("Failed to issue initial MFA code: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    record_audit_event(
        &pool,
        &user.email,
        "mfa_enabled",
        &format!("User {} enabled MFA", user.email),
        None,
    )
    .await;

    (StatusCode::OK, Json(MfaEnableResponse { secret })).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Code verified", body = Ack),
        (status = 400, description = "Invalid code", body = String),
        (status = 410, description = "Expired code", body = String),
        (status = 401, description = "Unauthorized")
    ),
    tag = "mfa"
)]
pub async fn verify_mfa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaVerifyRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let request: MfaVerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match verify_code(&pool, principal.user_id, &request.code).await {
        Ok(CodeOutcome::Verified) => (
            StatusCode::OK,
            Json(Ack::new("MFA code verified successfully")),
        )
            .into_response(),
        Ok(CodeOutcome::CodeInvalid) => {
            (StatusCode::BAD_REQUEST, "Invalid MFA code".to_string()).into_response()
        }
        Ok(CodeOutcome::CodeExpired) => {
            (StatusCode::GONE, "MFA code expired".to_string()).into_response()
        }
        Err(err) => {
            error!("MFA verification failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/disable",
    request_body = MfaDisableRequest,
    responses(
        (status = 200, description = "MFA disabled", body = Ack),
        (status = 400, description = "Invalid password", body = String),
        (status = 401, description = "Unauthorized")
    ),
    tag = "mfa"
)]
pub async fn disable_mfa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaDisableRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let request: MfaDisableRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let user = match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for MFA disable: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !verify_password_or_dummy(&request.password, user.password_hash.as_deref()) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    // The secret must not outlive the enabled flag.
    if let Err(err) = set_mfa(&pool, user.id, false, None).await {
        error!("Failed to disable MFA: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if let Err(err) = delete_codes(&pool, user.id).await {
        error!("Failed to delete MFA codes: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    record_audit_event(
        &pool,
        &user.email,
        "mfa_disabled",
        &format!("User {} disabled MFA", user.email),
        None,
    )
    .await;

    (StatusCode::OK, Json(Ack::new("MFA disabled successfully"))).into_response()
}

#[cfg(test)]
mod tests {
    use super::EMAIL_TEMPLATE_MFA_CODE;

    #[test]
    fn template_name_is_stable() {
        // The outbox worker and the mail templates key on this string.
        assert_eq!(EMAIL_TEMPLATE_MFA_CODE, "mfa_code");
    }
}
