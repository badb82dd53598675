//! Storage helpers for password reset codes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::auth::codes::OneTimeCode;

/// Upsert the user's reset code inside the caller's transaction; any prior
/// unconsumed code is superseded atomically.
pub(super) async fn upsert_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    code_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO password_reset_codes (user_id, code_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE
        SET code_hash = $2,
            expires_at = NOW() + ($3 * INTERVAL '1 second'),
            consumed_at = NULL,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(code_hash)
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to upsert password reset code")?;
    Ok(())
}

pub(super) async fn load_code(pool: &PgPool, user_id: Uuid) -> Result<Option<OneTimeCode>> {
    let query = r"
        SELECT code_hash, expires_at, consumed_at
        FROM password_reset_codes
        WHERE user_id = $1
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
        .context("failed to load password reset code")?;
    Ok(row.map(|row| OneTimeCode {
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
        consumed: row.get::<Option<DateTime<Utc>>, _>("consumed_at").is_some(),
    }))
}

/// Apply a verified reset as one transaction: consume the code, store the
/// new hash, and revoke every session. Returns false when a concurrent
/// reset consumed the code first; nothing is applied in that case.
pub(super) async fn apply_reset(
    pool: &PgPool,
    user_id: Uuid,
    code_hash: &[u8],
    new_password_hash: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin password reset transaction")?;

    let query = r"
        UPDATE password_reset_codes
        SET consumed_at = NOW()
        WHERE user_id = $1
          AND code_hash = $2
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume password reset code")?;

    if row.is_none() {
        let _ = tx.rollback().await;
        return Ok(false);
    }

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
        .bind(new_password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to store reset password hash")?;

    // Every outstanding session dies with the old password, including the
    // one that may have requested the reset.
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
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke sessions during reset")?;

    tx.commit().await.context("commit password reset transaction")?;
    Ok(true)
}
