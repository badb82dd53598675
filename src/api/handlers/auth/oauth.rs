//! External identity exchange (Google OAuth).
//!
//! The provider verifies the authorization code; this service only maps the
//! resulting verified email onto a local account. First contact creates a
//! password-less `customer` user, so password login stays unavailable for
//! that account until a password is set through staff tooling.

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use url::Url;

use super::{
    mfa,
    mint_session,
    state::{AuthState, GoogleConfig},
    storage::{
        insert_user, lookup_user_by_email, record_audit_event, SignupOutcome, UserRecord,
    },
    types::{OauthExchangeRequest, OauthUrlResponse, Role, TokenResponse},
    utils::{extract_client_ip, extract_user_agent, normalize_email},
};

/// Verified identity returned by the provider.
#[derive(Clone, Debug)]
struct VerifiedIdentity {
    email: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    name: Option<String>,
}

/// Whether the exchange must return a challenge instead of a token.
/// Kept as a plain function so the policy decision stays tested.
fn challenge_required(mfa_enabled: bool, oauth_mfa_gated: bool) -> bool {
    mfa_enabled && oauth_mfa_gated
}

/// Exchange the authorization code for a verified email and display name.
async fn exchange_code(
    http: &reqwest::Client,
    google: &GoogleConfig,
    code: &str,
) -> Result<VerifiedIdentity> {
    let token_response = http
        .post(google.token_endpoint())
        .form(&[
            ("client_id", google.client_id()),
            ("client_secret", google.client_secret().expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", google.redirect_uri()),
        ])
        .send()
        .await
        .context("token endpoint request failed")?;

    if !token_response.status().is_success() {
        return Err(anyhow!(
            "token endpoint returned {}",
            token_response.status()
        ));
    }

    let token_body: GoogleTokenResponse = token_response
        .json()
        .await
        .context("invalid token endpoint response")?;
    let access_token = token_body
        .access_token
        .ok_or_else(|| anyhow!("no access token in provider response"))?;

    let userinfo_response = http
        .get(google.userinfo_endpoint())
        .bearer_auth(&access_token)
        .send()
        .await
        .context("userinfo request failed")?;

    if !userinfo_response.status().is_success() {
        return Err(anyhow!(
            "userinfo endpoint returned {}",
            userinfo_response.status()
        ));
    }

    let userinfo: GoogleUserInfo = userinfo_response
        .json()
        .await
        .context("invalid userinfo response")?;
    let email = userinfo
        .email
        .ok_or_else(|| anyhow!("no email in provider response"))?;

    Ok(VerifiedIdentity {
        email: normalize_email(&email),
        name: userinfo.name,
    })
}

/// Find the account for a verified identity, creating a password-less
/// `customer` on first contact. The unique email index resolves creation
/// races; a conflict falls back to the winning row.
async fn find_or_create_user(pool: &PgPool, identity: &VerifiedIdentity) -> Result<UserRecord> {
    if let Some(user) = lookup_user_by_email(pool, &identity.email).await? {
        return Ok(user);
    }

    let full_name = identity
        .name
        .clone()
        .unwrap_or_else(|| {
            identity
                .email
                .split('@')
                .next()
                .unwrap_or(identity.email.as_str())
                .to_string()
        });

    match insert_user(pool, &identity.email, &full_name, None, Role::Customer).await? {
        SignupOutcome::Created(_) | SignupOutcome::Conflict => {
            lookup_user_by_email(pool, &identity.email)
                .await?
                .ok_or_else(|| anyhow!("user vanished after identity exchange insert"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/oauth/google/url",
    responses(
        (status = 200, description = "Provider consent URL", body = OauthUrlResponse),
        (status = 500, description = "Google OAuth not configured", body = String)
    ),
    tag = "oauth"
)]
pub async fn google_auth_url(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(google) = auth_state.config().google() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Google OAuth not configured".to_string(),
        )
            .into_response();
    };

    let auth_url = Url::parse_with_params(
        google.auth_endpoint(),
        &[
            ("client_id", google.client_id()),
            ("redirect_uri", google.redirect_uri()),
            ("scope", "openid email profile"),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    );

    match auth_url {
        Ok(url) => (
            StatusCode::OK,
            Json(OauthUrlResponse {
                auth_url: url.to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to build Google auth URL: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/oauth/google",
    request_body = OauthExchangeRequest,
    responses(
        (status = 200, description = "Token issued, or MFA challenge required", body = TokenResponse),
        (status = 400, description = "Exchange failed", body = String),
        (status = 500, description = "Google OAuth not configured", body = String)
    ),
    tag = "oauth"
)]
pub async fn google_exchange(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OauthExchangeRequest>>,
) -> impl IntoResponse {
    let request: OauthExchangeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let Some(google) = auth_state.config().google() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Google OAuth not configured".to_string(),
        )
            .into_response();
    };

    // Provider-side failures collapse into one outcome; the details go to
    // the log, not the caller.
    let identity = match exchange_code(auth_state.http(), google, request.code.trim()).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("Identity exchange failed: {err}");
            return (
                StatusCode::BAD_REQUEST,
                "Failed to exchange authorization code".to_string(),
            )
                .into_response();
        }
    };

    let user = match find_or_create_user(&pool, &identity).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to resolve identity exchange user: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Exchange failed".to_string(),
            )
                .into_response();
        }
    };

    if challenge_required(user.mfa_enabled, auth_state.config().oauth_mfa_gated()) {
        if let Err(err) = mfa::issue_verify_code(&pool, auth_state.config(), &user).await {
            error!("Failed to issue MFA challenge for identity exchange: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Exchange failed".to_string(),
            )
                .into_response();
        }
        return (StatusCode::OK, Json(TokenResponse::challenge())).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
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
            error!("Failed to mint session after exchange: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Exchange failed".to_string(),
            )
                .into_response();
        }
    };

    record_audit_event(
        &pool,
        &user.email,
        "oauth_login",
        &format!("User {} logged in via Google", user.email),
        client_ip.as_deref(),
    )
    .await;

    (
        StatusCode::OK,
        Json(TokenResponse::issued(token, user.role)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_gates_mfa_users_by_default() {
        assert!(challenge_required(true, true));
        assert!(!challenge_required(false, true));
    }

    #[test]
    fn challenge_skipped_when_gate_disabled() {
        assert!(!challenge_required(true, false));
        assert!(!challenge_required(false, false));
    }
}
