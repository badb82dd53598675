//! Storage helpers for MFA challenge codes and factor state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::auth::codes::OneTimeCode;

/// Upsert the user's challenge code inside the caller's transaction.
/// The `ON CONFLICT` update is what invalidates any prior unconsumed code
/// atomically with creating the new one.
pub(super) async fn upsert_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    code_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO mfa_codes (user_id, code_hash, expires_at)
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
        .context("failed to upsert MFA code")?;
    Ok(())
}

pub(super) async fn load_code(pool: &PgPool, user_id: Uuid) -> Result<Option<OneTimeCode>> {
    let query = r"
        SELECT code_hash, expires_at, consumed_at
        FROM mfa_codes
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
        .context("failed to load MFA code")?;
    Ok(row.map(|row| OneTimeCode {
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
        consumed: row.get::<Option<DateTime<Utc>>, _>("consumed_at").is_some(),
    }))
}

/// Mark the code consumed. The conditions repeat the validity checks so a
/// concurrent verify can win at most once.
pub(super) async fn consume_code(pool: &PgPool, user_id: Uuid, code_hash: &[u8]) -> Result<bool> {
    let query = r"
        UPDATE mfa_codes
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
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume MFA code")?;
    Ok(row.is_some())
}

pub(super) async fn delete_codes(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "DELETE FROM mfa_codes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete MFA codes")?;
    Ok(())
}

/// Flip the user's factor state. Disabling always clears the shared secret.
pub(super) async fn set_mfa(
    pool: &PgPool,
    user_id: Uuid,
    enabled: bool,
    secret: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET mfa_enabled = $2,
            mfa_secret = $3,
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
        .bind(enabled)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update MFA state")?;
    Ok(())
}
