//! Session management.
//!
//! ARCHITECTURE
//! ============
//! Local sessions are opaque random tokens. Only the sha256 of a token is
//! stored, so a leaked sessions table cannot be replayed.
//!
//! TRADE-OFFS
//! ==========
//! Expired rows are not deleted on read; the maintenance sweeper prunes
//! them in bulk.

use std::fmt::Write;

use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::now_ms;

const MS_PER_HOUR: i64 = 3_600_000;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Hex sha256 of a token, as stored in `sessions.token_hash`.
#[must_use]
pub fn hash_token(token: &str) -> String {
    bytes_to_hex(&Sha256::digest(token.as_bytes()))
}

/// User row returned from session validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionUser {
    /// Unique user identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    pub email: Option<String>,
    /// How the request was authenticated (`"session"` or `"identity"`).
    pub auth_method: String,
}

/// Create a session for the given user, returning the plaintext token.
pub async fn create_session(pool: &PgPool, user_id: Uuid, ttl_hours: i64) -> Result<String, sqlx::Error> {
    let token = generate_token();
    let now = now_ms();
    sqlx::query("INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)")
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(now)
        .bind(now.saturating_add(ttl_hours.saturating_mul(MS_PER_HOUR)))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Validate a session token and return the associated user.
pub async fn validate_session(pool: &PgPool, token: &str) -> Result<Option<SessionUser>, sqlx::Error> {
    let row = sqlx::query(
        r"SELECT u.id, u.name, u.email
          FROM sessions s
          JOIN users u ON u.id = s.user_id
          WHERE s.token_hash = $1 AND s.expires_at > $2",
    )
    .bind(hash_token(token))
    .bind(now_ms())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SessionUser {
        id: r.get("id"),
        name: r.get("name"),
        email: r.get("email"),
        auth_method: "session".into(),
    }))
}

/// Load a user by id, used after delegated identity verification.
pub async fn load_user(pool: &PgPool, user_id: Uuid) -> Result<Option<SessionUser>, sqlx::Error> {
    let row = sqlx::query("SELECT id, name, email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| SessionUser {
        id: r.get("id"),
        name: r.get("name"),
        email: r.get("email"),
        auth_method: "identity".into(),
    }))
}

/// Delete a session by token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete all sessions that expired before `now`. Returns the number removed.
pub async fn prune_expired(pool: &PgPool, now: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Upsert a local user by display name for the dev bootstrap route.
pub async fn upsert_dev_user(pool: &PgPool, name: &str) -> Result<Uuid, sqlx::Error> {
    let subject = format!("dev:{}", name.to_ascii_lowercase());
    let row = sqlx::query(
        r"INSERT INTO users (id, name, external_subject, created_at)
          VALUES ($1, $2, $3, $4)
          ON CONFLICT (external_subject) DO UPDATE SET name = EXCLUDED.name
          RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(subject)
    .bind(now_ms())
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
