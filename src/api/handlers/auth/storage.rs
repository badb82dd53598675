//! Database helpers for users, sessions, and audit events.
//!
//! Raw tokens never touch the database: session rows key on a SHA-256 hash
//! of the access token. Session expiry is fixed at creation; activity
//! updates advance `last_activity` only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use uuid::Uuid;

use super::types::Role;
use super::utils::is_unique_violation;

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    Conflict,
}

/// User fields needed by the auth flows.
#[derive(Clone, Debug)]
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) full_name: String,
    pub(super) password_hash: Option<String>,
    pub(super) role: Role,
    pub(super) mfa_enabled: bool,
}

/// Data returned for a valid session token.
#[derive(Clone, Debug)]
pub(crate) struct SessionRecord {
    pub(crate) session_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: Role,
}

/// One row of the authenticated user's session list.
#[derive(Clone, Debug)]
pub(super) struct SessionListRow {
    pub(super) id: Uuid,
    pub(super) created_at: DateTime<Utc>,
    pub(super) last_activity: DateTime<Utc>,
    pub(super) expires_at: DateTime<Utc>,
    pub(super) ip_address: Option<String>,
    pub(super) user_agent: Option<String>,
    pub(super) token_hash: Vec<u8>,
}

fn role_from_row(value: &str) -> Role {
    Role::from_str(value).unwrap_or(Role::Customer)
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    let role: String = row.get("role");
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        role: role_from_row(&role),
        mfa_enabled: row.get("mfa_enabled"),
    }
}

pub(super) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, full_name, password_hash, role, mfa_enabled
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    Ok(row.map(|row| user_from_row(&row)))
}

pub(super) async fn lookup_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, full_name, password_hash, role, mfa_enabled
        FROM users
        WHERE id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;
    Ok(row.map(|row| user_from_row(&row)))
}

/// Insert a new user. The unique index on `email` is the conflict authority;
/// concurrent signups for the same address race safely here.
pub(super) async fn insert_user(
    pool: &PgPool,
    email: &str,
    full_name: &str,
    password_hash: Option<&str>,
    role: Role,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (email, full_name, password_hash, role, mfa_enabled)
        VALUES ($1, $2, $3, $4, FALSE)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(full_name)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Store a new password hash for an authenticated password change.
/// The caller revokes sessions afterwards; reset flows use their own
/// transaction in `recovery::storage`.
pub(super) async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

/// Create the session row paired with a freshly minted token.
///
/// The caller only returns the token to the client after this insert
/// succeeds, so a token never exists without its session.
pub(super) async fn insert_session(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO user_sessions
            (id, user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'), $5, $6)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .bind(ip_address)
        .bind(user_agent)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert session")?;
    Ok(())
}

/// Resolve a token hash to its active, unexpired session.
///
/// A hit also records activity without extending the session deadline.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT user_sessions.id AS session_id, users.id AS user_id, users.email, users.role
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.token_hash = $1
          AND user_sessions.is_active
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    touch_session(pool, token_hash).await?;

    let role: String = row.get("role");
    Ok(Some(SessionRecord {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        role: role_from_row(&role),
    }))
}

/// Advance `last_activity`; never touches `expires_at`.
pub(super) async fn touch_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = r"
        UPDATE user_sessions
        SET last_activity = NOW()
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session last_activity")?;
    Ok(())
}

/// Deactivate one session owned by the user. Returns false only when no such
/// session exists for the user; revoking an already-inactive session is a
/// no-op success.
pub(super) async fn revoke_session(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE
        WHERE id = $1
          AND user_id = $2
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(row.is_some())
}

/// Deactivate the presented session on logout. Idempotent.
pub(super) async fn revoke_session_by_token_hash(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session by token")?;
    Ok(())
}

/// Deactivate every active session for the user in one statement, so the
/// revocation is atomic with respect to concurrent session creation.
pub(crate) async fn revoke_all_sessions(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE
        WHERE user_id = $1
          AND is_active
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke all sessions")?;
    Ok(result.rows_affected())
}

/// List the user's active sessions, excluding expired rows even before the
/// sweeper has marked them inactive.
pub(super) async fn list_active_sessions(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<SessionListRow>> {
    let query = r"
        SELECT id, created_at, last_activity, expires_at, ip_address, user_agent, token_hash
        FROM user_sessions
        WHERE user_id = $1
          AND is_active
          AND expires_at > NOW()
        ORDER BY last_activity DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list active sessions")?;

    Ok(rows
        .into_iter()
        .map(|row| SessionListRow {
            id: row.get("id"),
            created_at: row.get("created_at"),
            last_activity: row.get("last_activity"),
            expires_at: row.get("expires_at"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            token_hash: row.get("token_hash"),
        })
        .collect())
}

pub(super) async fn count_active_sessions(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS active
        FROM user_sessions
        WHERE user_id = $1
          AND is_active
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count active sessions")?;
    Ok(row.get("active"))
}

/// Mark expired sessions inactive. Idempotent; rows whose deadline is still
/// in the future are never touched.
pub(crate) async fn sweep_expired_sessions(pool: &PgPool) -> Result<u64> {
    let query = r"
        UPDATE user_sessions
        SET is_active = FALSE
        WHERE is_active
          AND expires_at <= NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep expired sessions")?;
    Ok(result.rows_affected())
}

/// Record an audit event. Best-effort: the audit trail must never fail the
/// request that produced it, so errors are logged and swallowed.
pub(super) async fn record_audit_event(
    pool: &PgPool,
    actor: &str,
    action: &str,
    details: &str,
    ip_address: Option<&str>,
) {
    let query = r"
        INSERT INTO audit_log (actor, action, details, ip_address)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    if let Err(err) = sqlx::query(query)
        .bind(actor)
        .bind(action)
        .bind(details)
        .bind(ip_address)
        .execute(pool)
        .instrument(span)
        .await
    {
        error!("Failed to record audit event {action}: {err}");
    }
}

/// Enqueue an outbound email inside the caller's transaction, so the message
/// only becomes visible if the surrounding write commits.
pub(super) async fn enqueue_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload_json: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_json)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{role_from_row, SignupOutcome};
    use crate::api::handlers::auth::types::Role;
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        let id = Uuid::nil();
        assert_eq!(
            format!("{:?}", SignupOutcome::Created(id)),
            format!("Created({id:?})")
        );
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn unknown_role_degrades_to_customer() {
        assert_eq!(role_from_row("manager"), Role::Manager);
        assert_eq!(role_from_row("night_auditor"), Role::Customer);
        assert_eq!(role_from_row(""), Role::Customer);
    }
}
