//! Checking tools out and back in.
//!
//! DESIGN
//! ======
//! Checkout flips the tool with a conditional `UPDATE ... WHERE status =
//! 'available'`, so two concurrent checkouts of one tool cannot both win.
//! The partial unique index on open checkouts backs this up at the schema
//! level.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::tool::ToolStatus;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("tool not found: {0}")]
    ToolNotFound(Uuid),
    #[error("tool {tool_id} is not available (status {status})")]
    NotAvailable { tool_id: Uuid, status: String },
    #[error("tool {0} has no open checkout")]
    NotCheckedOut(Uuid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CheckoutRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tool_id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_name: String,
    pub intended_usage: Option<String>,
    pub notes: Option<String>,
    pub expected_return_at: Option<i64>,
    pub before_image_url: Option<String>,
    pub after_image_url: Option<String>,
    pub checkin_notes: Option<String>,
    pub checked_out_at: i64,
    pub returned_at: Option<i64>,
}

const CHECKOUT_COLUMNS: &str = "id, organization_id, tool_id, user_id, user_name, intended_usage, notes, \
     expected_return_at, before_image_url, after_image_url, checkin_notes, checked_out_at, returned_at";

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    /// Name shown on the checkout card; defaults to the caller's name.
    pub user_name: Option<String>,
    pub intended_usage: Option<String>,
    pub notes: Option<String>,
    pub expected_return_at: Option<i64>,
    pub before_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckinRequest {
    pub after_image_url: Option<String>,
    pub checkin_notes: Option<String>,
    /// Updated tool condition, if the user assessed it.
    pub condition: Option<String>,
    /// When true the tool goes to `unavailable` instead of `available`.
    #[serde(default)]
    pub tool_broken: bool,
}

/// Validate a checkout request against the clock.
pub(crate) fn validate_checkout(request: &CheckoutRequest, now: i64) -> Result<(), CheckoutError> {
    if let Some(expected) = request.expected_return_at {
        if expected < now {
            return Err(CheckoutError::Validation("expected_return_at is in the past".into()));
        }
    }
    Ok(())
}

/// Status the tool returns to after checkin.
pub(crate) fn status_after_checkin(request: &CheckinRequest) -> ToolStatus {
    if request.tool_broken { ToolStatus::Unavailable } else { ToolStatus::Available }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

/// Check a tool out.
///
/// # Errors
///
/// `ToolNotFound` if absent, `NotAvailable` if the tool is not `available`.
pub async fn checkout_tool(
    pool: &PgPool,
    org_id: Uuid,
    tool_id: Uuid,
    user_id: Uuid,
    default_user_name: &str,
    request: CheckoutRequest,
) -> Result<CheckoutRow, CheckoutError> {
    let now = now_ms();
    validate_checkout(&request, now)?;
    let user_name = trimmed(request.user_name.as_deref()).unwrap_or_else(|| default_user_name.to_owned());

    let mut tx = pool.begin().await?;
    let flipped = sqlx::query(
        "UPDATE tools SET status = 'checked_out', updated_at = $3
         WHERE id = $1 AND organization_id = $2 AND status = 'available'",
    )
    .bind(tool_id)
    .bind(org_id)
    .bind(now)
    .execute(tx.as_mut())
    .await?;

    if flipped.rows_affected() == 0 {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM tools WHERE id = $1 AND organization_id = $2")
                .bind(tool_id)
                .bind(org_id)
                .fetch_optional(tx.as_mut())
                .await?;
        return match status {
            Some(status) => {
                warn!(%tool_id, %status, "checkout rejected: tool not available");
                Err(CheckoutError::NotAvailable { tool_id, status })
            }
            None => Err(CheckoutError::ToolNotFound(tool_id)),
        };
    }

    let row = sqlx::query_as::<_, CheckoutRow>(&format!(
        "INSERT INTO checkouts (id, organization_id, tool_id, user_id, user_name, intended_usage, notes, \
             expected_return_at, before_image_url, checked_out_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING {CHECKOUT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(tool_id)
    .bind(user_id)
    .bind(&user_name)
    .bind(trimmed(request.intended_usage.as_deref()))
    .bind(trimmed(request.notes.as_deref()))
    .bind(request.expected_return_at)
    .bind(trimmed(request.before_image_url.as_deref()))
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %tool_id, checkout_id = %row.id, %user_name, "tool checked out");
    Ok(row)
}

/// Check a tool back in, closing its open checkout.
///
/// # Errors
///
/// `NotCheckedOut` if the tool has no open checkout.
pub async fn checkin_tool(
    pool: &PgPool,
    org_id: Uuid,
    tool_id: Uuid,
    request: CheckinRequest,
) -> Result<CheckoutRow, CheckoutError> {
    let now = now_ms();
    let next_status = status_after_checkin(&request);

    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, CheckoutRow>(&format!(
        "UPDATE checkouts SET returned_at = $3, after_image_url = $4, checkin_notes = $5 \
         WHERE tool_id = $1 AND organization_id = $2 AND returned_at IS NULL \
         RETURNING {CHECKOUT_COLUMNS}"
    ))
    .bind(tool_id)
    .bind(org_id)
    .bind(now)
    .bind(trimmed(request.after_image_url.as_deref()))
    .bind(trimmed(request.checkin_notes.as_deref()))
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(CheckoutError::NotCheckedOut(tool_id))?;

    sqlx::query(
        "UPDATE tools SET status = $3, condition = COALESCE($4, condition), updated_at = $5
         WHERE id = $1 AND organization_id = $2",
    )
    .bind(tool_id)
    .bind(org_id)
    .bind(next_status.as_str())
    .bind(trimmed(request.condition.as_deref()))
    .bind(now)
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %tool_id, checkout_id = %row.id, status = next_status.as_str(), "tool checked in");
    Ok(row)
}

/// List open checkouts, optionally only those past their expected return.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_open_checkouts(pool: &PgPool, org_id: Uuid, overdue_only: bool) -> Result<Vec<CheckoutRow>, CheckoutError> {
    let overdue_before = if overdue_only { Some(now_ms()) } else { None };
    let rows = sqlx::query_as::<_, CheckoutRow>(&format!(
        "SELECT {CHECKOUT_COLUMNS} FROM checkouts \
         WHERE organization_id = $1 AND returned_at IS NULL \
           AND ($2::BIGINT IS NULL OR (expected_return_at IS NOT NULL AND expected_return_at < $2)) \
         ORDER BY checked_out_at DESC"
    ))
    .bind(org_id)
    .bind(overdue_before)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Checkout history for one tool, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn tool_history(pool: &PgPool, org_id: Uuid, tool_id: Uuid) -> Result<Vec<CheckoutRow>, CheckoutError> {
    let rows = sqlx::query_as::<_, CheckoutRow>(&format!(
        "SELECT {CHECKOUT_COLUMNS} FROM checkouts \
         WHERE organization_id = $1 AND tool_id = $2 \
         ORDER BY checked_out_at DESC"
    ))
    .bind(org_id)
    .bind(tool_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "checkout_test.rs"]
mod tests;
