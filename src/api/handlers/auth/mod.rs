//! Credential and session lifecycle handlers.
//!
//! Flow Overview:
//! 1) Login verifies the password against the stored Argon2 hash. Unknown
//!    email, wrong password, and password-less accounts all collapse into
//!    one invalid-credentials outcome.
//! 2) With MFA enabled, login without a code returns `mfa_required = true`
//!    (not an error) and issues a fresh challenge code; login with a code
//!    completes the challenge before any token is minted.
//! 3) Every minted token is paired with exactly one session row. The row
//!    is inserted before the token leaves the process.
//! 4) Password change and reset revoke every outstanding session.
//!
//! Security boundaries:
//! - The database stores token and code hashes, never raw values.
//! - Session deadlines are fixed at creation; activity never extends them.
//! - MFA enable/disable re-authenticates the password, so a hijacked
//!   session alone cannot silently change factor state.

mod codes;
pub(crate) mod mfa;
pub(crate) mod oauth;
mod password;
pub(crate) mod principal;
pub(crate) mod recovery;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
mod token;
pub(crate) mod types;
mod utils;

pub use self::state::{AuthConfig, AuthState, GoogleConfig};
pub use self::types::Role;

use anyhow::Result;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use self::codes::CodeOutcome;
use self::password::{hash_password, verify_password_or_dummy};
use self::principal::require_auth;
use self::storage::{
    count_active_sessions, insert_session, insert_user, lookup_user_by_email, lookup_user_by_id,
    record_audit_event, revoke_all_sessions, update_password_hash, SignupOutcome, UserRecord,
};
use self::token::{mint_access_token, AccessClaims};
use self::types::{
    Ack, LoginRequest, MeResponse, PasswordChangeRequest, SignupRequest, TokenResponse,
};
use self::utils::{
    extract_client_ip, extract_user_agent, hash_access_token, normalize_email, valid_email,
};

const MIN_PASSWORD_LENGTH: usize = 6;

/// Mint a token and create its session row as one logical unit.
///
/// The token string is only returned once the insert has succeeded, so a
/// mint can never outlive a failed session write.
pub(super) async fn mint_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user_id: Uuid,
    role: types::Role,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<String> {
    let session_id = Uuid::new_v4();
    let ttl_seconds = auth_state.config().token_ttl_seconds();
    let claims = AccessClaims::new(user_id, session_id, role, ttl_seconds);
    let token = mint_access_token(auth_state.config().jwt_secret(), &claims)?;
    let token_hash = hash_access_token(&token);
    insert_session(
        pool,
        session_id,
        user_id,
        &token_hash,
        ttl_seconds,
        ip_address,
        user_agent,
    )
    .await?;
    Ok(token)
}

#[utoipa::path(
    post,
    path = "/v1/auth/token",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued, or MFA challenge required", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 400, description = "Invalid MFA code", body = String),
        (status = 410, description = "Expired MFA code", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Login lookup failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // One uniform failure for unknown email, wrong password, and accounts
    // without a password hash. The dummy verification keeps timing flat
    // across all three.
    let verified = match user.as_ref() {
        Some(user) => verify_password_or_dummy(&request.password, user.password_hash.as_deref()),
        None => verify_password_or_dummy(&request.password, None),
    };
    let Some(user) = user.filter(|_| verified) else {
        record_audit_event(
            &pool,
            &email,
            "login_failed",
            &format!("Failed login attempt for {email}"),
            client_ip.as_deref(),
        )
        .await;
        return (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response();
    };

    if user.mfa_enabled {
        match request.mfa_code.as_deref().map(str::trim) {
            None | Some("") => {
                // Challenge, not an error: issue a fresh code and tell the
                // client to come back with it.
                if let Err(err) = mfa::issue_verify_code(&pool, auth_state.config(), &user).await {
                    error!("Failed to issue MFA challenge code: {err}");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                        .into_response();
                }
                return (StatusCode::OK, Json(TokenResponse::challenge())).into_response();
            }
            Some(code) => match mfa::verify_code(&pool, user.id, code).await {
                Ok(CodeOutcome::Verified) => {}
                Ok(CodeOutcome::CodeInvalid) => {
                    return (StatusCode::BAD_REQUEST, "Invalid MFA code".to_string())
                        .into_response();
                }
                Ok(CodeOutcome::CodeExpired) => {
                    return (StatusCode::GONE, "MFA code expired".to_string()).into_response();
                }
                Err(err) => {
                    error!("MFA verification failed: {err}");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                        .into_response();
                }
            },
        }
    }

    let token = match mint_session(
        &pool,
        &auth_state,
        user.id,
        user.role,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to mint session: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    record_audit_event(
        &pool,
        &user.email,
        "login_success",
        &format!("User {} logged in with role {}", user.email, user.role.as_str()),
        client_ip.as_deref(),
    )
    .await;

    (
        StatusCode::OK,
        Json(TokenResponse::issued(token, user.role)),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, token issued", body = TokenResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be at least 6 characters long".to_string(),
        )
            .into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash signup password: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    let user_id = match insert_user(
        &pool,
        &email,
        request.full_name.trim(),
        Some(&password_hash),
        types::Role::Customer,
    )
    .await
    {
        Ok(SignupOutcome::Created(user_id)) => user_id,
        Ok(SignupOutcome::Conflict) => {
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to insert user: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let token = match mint_session(
        &pool,
        &auth_state,
        user_id,
        types::Role::Customer,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to mint session after signup: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    record_audit_event(
        &pool,
        &email,
        "signup",
        &format!("New account for {email}"),
        client_ip.as_deref(),
    )
    .await;

    (
        StatusCode::CREATED,
        Json(TokenResponse::issued(token, types::Role::Customer)),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/change-password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed, all sessions revoked", body = Ack),
        (status = 400, description = "Invalid old password", body = String),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordChangeRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let request: PasswordChangeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be at least 6 characters long".to_string(),
        )
            .into_response();
    }

    let user = match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for password change: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !verify_password_or_dummy(&request.old_password, user.password_hash.as_deref()) {
        return (StatusCode::BAD_REQUEST, "Invalid old password".to_string()).into_response();
    }

    let new_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = update_password_hash(&pool, user.id, &new_hash).await {
        error!("Failed to store new password: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // Every outstanding session dies with the old password, including the
    // one making this request.
    if let Err(err) = revoke_all_sessions(&pool, user.id).await {
        error!("Failed to revoke sessions after password change: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    record_audit_event(
        &pool,
        &user.email,
        "password_changed",
        &format!("User {} changed password", user.email),
        None,
    )
    .await;

    (
        StatusCode::OK,
        Json(Ack::new(
            "Password changed successfully. Please login again.",
        )),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Authenticated user summary", body = MeResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let user = match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let active_sessions = match count_active_sessions(&pool, user.id).await {
        Ok(count) => count,
        Err(err) => {
            error!("Failed to count sessions: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let UserRecord {
        id,
        email,
        full_name,
        role,
        mfa_enabled,
        ..
    } = user;

    (
        StatusCode::OK,
        Json(MeResponse {
            id: id.to_string(),
            email,
            full_name,
            role,
            mfa_enabled,
            active_sessions,
        }),
    )
        .into_response()
}
