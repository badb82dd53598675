//! Session endpoints: list, terminate, logout.

use axum::{
    extract::{Extension, Path},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    principal::require_auth,
    state::AuthState,
    storage::{
        list_active_sessions, record_audit_event, revoke_session, revoke_session_by_token_hash,
    },
    types::{Ack, SessionSummary},
    utils::hash_access_token,
};

/// Pull the raw token out of the `Authorization: Bearer` header.
pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions for the authenticated user", body = [SessionSummary]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let rows = match list_active_sessions(&pool, principal.user_id).await {
        Ok(rows) => rows,
        Err(err) => {
            error!("Failed to list sessions: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let sessions: Vec<SessionSummary> = rows
        .into_iter()
        .map(|row| SessionSummary {
            id: row.id.to_string(),
            created_at: row.created_at,
            last_activity: row.last_activity,
            expires_at: row.expires_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            is_current: row.token_hash == principal.token_hash,
        })
        .collect();

    (StatusCode::OK, Json(sessions)).into_response()
}

#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{session_id}",
    params(
        ("session_id" = String, Path, description = "Session id to terminate")
    ),
    responses(
        (status = 200, description = "Session terminated", body = Ack),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session not found", body = String)
    ),
    tag = "sessions"
)]
pub async fn terminate_session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    // Ownership is part of the WHERE clause; someone else's session id is
    // indistinguishable from a nonexistent one.
    match revoke_session(&pool, session_id, principal.user_id).await {
        Ok(true) => {
            record_audit_event(
                &pool,
                &principal.email,
                "session_terminated",
                &format!("Session {session_id} terminated"),
                None,
            )
            .await;
            (StatusCode::OK, Json(Ack::new("Session ended successfully"))).into_response()
        }
        Ok(false) => (StatusCode::NOT_FOUND, "Session not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to terminate session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = Ack)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // Logout is idempotent: an invalid or already-revoked token still gets
    // an acknowledgement, there is nothing useful to reveal.
    if let Ok(principal) = require_auth(&headers, &pool, &auth_state).await {
        if let Err(err) = revoke_session_by_token_hash(&pool, &principal.token_hash).await {
            error!("Failed to revoke session on logout: {err}");
        }
        record_audit_event(
            &pool,
            &principal.email,
            "logout",
            &format!("User {} logged out", principal.email),
            None,
        )
        .await;
    } else if let Some(token) = extract_bearer_token(&headers) {
        // The token may fail principal checks (e.g. expired) while the row
        // still exists; deactivate it anyway.
        let token_hash = hash_access_token(&token);
        if let Err(err) = revoke_session_by_token_hash(&pool, &token_hash).await {
            error!("Failed to revoke session on logout: {err}");
        }
    }

    (StatusCode::OK, Json(Ack::new("Logged out successfully"))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_token_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(
            extract_bearer_token(&headers),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn extract_bearer_token_accepts_lowercase_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer token"));
        assert_eq!(extract_bearer_token(&headers), Some("token".to_string()));
    }

    #[test]
    fn extract_bearer_token_rejects_empty_or_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
