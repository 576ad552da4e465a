//! Audit-set generation plus audit session snapshots and per-tool results.
//!
//! DESIGN
//! ======
//! An audit samples the available tools of one storage vicinity. Tools that
//! have never been audited always go first; the remainder is filled with the
//! least-recently-audited tools. When more never-audited tools exist than
//! requested, a random subset of them is taken so repeated audits spread
//! across the backlog.
//!
//! The chosen ids are persisted as an `audit_sessions` row so a client can
//! leave for a per-tool audit page and resume the same list afterwards.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use sqlx::types::Json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::tool::{TOOL_COLUMNS, ToolRow, ToolStatus};

pub const MIN_AUDIT_QUANTITY: i64 = 1;
pub const MAX_AUDIT_QUANTITY: i64 = 20;
pub const DEFAULT_AUDIT_QUANTITY: usize = 5;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("tool not found: {0}")]
    ToolNotFound(Uuid),
    #[error("audit session {0} is already completed")]
    SessionCompleted(Uuid),
    #[error("tool {tool_id} is not part of audit session {session_id}")]
    ToolNotInSession { session_id: Uuid, tool_id: Uuid },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditSessionRecord {
    id: Uuid,
    organization_id: Uuid,
    vicinity: String,
    requested_quantity: i32,
    tool_ids: Json<Vec<Uuid>>,
    created_by: Option<Uuid>,
    created_at: i64,
    completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSession {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub vicinity: String,
    pub requested_quantity: i32,
    pub tool_ids: Vec<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl From<AuditSessionRecord> for AuditSession {
    fn from(r: AuditSessionRecord) -> Self {
        Self {
            id: r.id,
            organization_id: r.organization_id,
            vicinity: r.vicinity,
            requested_quantity: r.requested_quantity,
            tool_ids: r.tool_ids.0,
            created_by: r.created_by,
            created_at: r.created_at,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSessionTool {
    #[serde(flatten)]
    pub tool: ToolRow,
    /// Whether this tool has a result recorded in this session.
    pub audited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSessionView {
    pub session: AuditSession,
    pub tools: Vec<AuditSessionTool>,
    pub audited_count: usize,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VicinitySummary {
    pub vicinity: String,
    pub total: i64,
    pub available: i64,
    pub never_audited: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolAuditRequest {
    pub audit_session_id: Option<Uuid>,
    pub found: bool,
    pub condition: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ToolAuditRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub audit_session_id: Option<Uuid>,
    pub tool_id: Uuid,
    pub audited_by: Option<Uuid>,
    pub found: bool,
    pub condition: Option<String>,
    pub notes: Option<String>,
    pub photo_urls: Json<Vec<String>>,
    pub created_at: i64,
}

const TOOL_AUDIT_COLUMNS: &str =
    "id, organization_id, audit_session_id, tool_id, audited_by, found, condition, notes, photo_urls, created_at";

const SESSION_COLUMNS: &str =
    "id, organization_id, vicinity, requested_quantity, tool_ids, created_by, created_at, completed_at";

// =============================================================================
// SELECTION
// =============================================================================

/// Clamp a requested audit size into `1..=20`; absent means 5.
#[must_use]
pub fn clamp_quantity(requested: Option<i64>) -> usize {
    let Some(requested) = requested else {
        return DEFAULT_AUDIT_QUANTITY;
    };
    let clamped = requested.clamp(MIN_AUDIT_QUANTITY, MAX_AUDIT_QUANTITY);
    usize::try_from(clamped).unwrap_or(DEFAULT_AUDIT_QUANTITY)
}

/// Choose up to `quantity` items from `pool`.
///
/// Items whose `last_audited` is `None` come first. If they alone cover the
/// quantity, a random subset of them is returned. Otherwise all of them are
/// kept and the rest is filled with the least-recently-audited items in
/// ascending `last_audited` order.
pub fn select_audit_set<T, F, R>(pool: Vec<T>, quantity: usize, last_audited: F, rng: &mut R) -> Vec<T>
where
    F: Fn(&T) -> Option<i64>,
    R: Rng + ?Sized,
{
    if quantity == 0 {
        return Vec::new();
    }

    let (mut never, mut audited): (Vec<T>, Vec<T>) = pool.into_iter().partition(|item| last_audited(item).is_none());

    if never.len() >= quantity {
        never.shuffle(rng);
        never.truncate(quantity);
        return never;
    }

    // Shuffle before the stable sort so equal timestamps are tie-broken randomly.
    audited.shuffle(rng);
    audited.sort_by_key(|item| last_audited(item));

    let remaining = quantity - never.len();
    never.shuffle(rng);
    never.extend(audited.into_iter().take(remaining));
    never
}

/// Status a tool moves to after an audit result.
#[must_use]
pub fn status_after_audit(current: ToolStatus, found: bool) -> ToolStatus {
    match (current, found) {
        (ToolStatus::CheckedOut, _) => ToolStatus::CheckedOut,
        (ToolStatus::UnableToFind, true) => ToolStatus::Available,
        (_, false) => ToolStatus::UnableToFind,
        (status, true) => status,
    }
}

// =============================================================================
// VICINITIES
// =============================================================================

/// Summarize the storage vicinities of an organization.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_vicinities(pool: &PgPool, org_id: Uuid) -> Result<Vec<VicinitySummary>, AuditError> {
    let rows = sqlx::query_as::<_, VicinitySummary>(
        "SELECT storage_vicinity AS vicinity,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'available') AS available,
                COUNT(*) FILTER (WHERE status = 'available' AND last_audited_at IS NULL) AS never_audited
         FROM tools
         WHERE organization_id = $1 AND storage_vicinity IS NOT NULL
         GROUP BY storage_vicinity
         ORDER BY storage_vicinity ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Generate an audit set for a vicinity and persist it as a session.
///
/// # Errors
///
/// `Validation` for a blank vicinity.
pub async fn generate_audit(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
    vicinity: &str,
    requested: Option<i64>,
) -> Result<AuditSessionView, AuditError> {
    let vicinity = vicinity.trim();
    if vicinity.is_empty() {
        return Err(AuditError::Validation("vicinity is required".into()));
    }
    let quantity = clamp_quantity(requested);

    let candidates = sqlx::query_as::<_, ToolRow>(&format!(
        "SELECT {TOOL_COLUMNS} FROM tools \
         WHERE organization_id = $1 AND storage_vicinity = $2 AND status = 'available'"
    ))
    .bind(org_id)
    .bind(vicinity)
    .fetch_all(pool)
    .await?;
    let pool_size = candidates.len();

    let selected = select_audit_set(candidates, quantity, |tool| tool.last_audited_at, &mut rand::rng());
    let tool_ids: Vec<Uuid> = selected.iter().map(|tool| tool.id).collect();

    let record = sqlx::query_as::<_, AuditSessionRecord>(&format!(
        "INSERT INTO audit_sessions (id, organization_id, vicinity, requested_quantity, tool_ids, created_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {SESSION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(vicinity)
    .bind(i32::try_from(quantity).unwrap_or(i32::MAX))
    .bind(Json(&tool_ids))
    .bind(user_id)
    .bind(now_ms())
    .fetch_one(pool)
    .await?;

    info!(
        %org_id,
        session_id = %record.id,
        %vicinity,
        quantity,
        pool_size,
        selected = tool_ids.len(),
        "audit session generated"
    );

    let tools = selected.into_iter().map(|tool| AuditSessionTool { tool, audited: false }).collect();
    Ok(AuditSessionView { session: record.into(), tools, audited_count: 0 })
}

async fn load_session(pool: &PgPool, org_id: Uuid, session_id: Uuid) -> Result<AuditSession, AuditError> {
    sqlx::query_as::<_, AuditSessionRecord>(&format!(
        "SELECT {SESSION_COLUMNS} FROM audit_sessions WHERE id = $1 AND organization_id = $2"
    ))
    .bind(session_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .map(AuditSession::from)
    .ok_or(AuditError::SessionNotFound(session_id))
}

/// Lock a session row until `conn`'s transaction ends.
async fn lock_session(conn: &mut PgConnection, org_id: Uuid, session_id: Uuid) -> Result<AuditSession, AuditError> {
    sqlx::query_as::<_, AuditSessionRecord>(&format!(
        "SELECT {SESSION_COLUMNS} FROM audit_sessions WHERE id = $1 AND organization_id = $2 FOR UPDATE"
    ))
    .bind(session_id)
    .bind(org_id)
    .fetch_optional(conn)
    .await?
    .map(AuditSession::from)
    .ok_or(AuditError::SessionNotFound(session_id))
}

/// A session accepts results only while open and only for its own tools.
pub(crate) fn ensure_session_accepts(session: &AuditSession, tool_id: Uuid) -> Result<(), AuditError> {
    if session.completed_at.is_some() {
        return Err(AuditError::SessionCompleted(session.id));
    }
    if !session.tool_ids.contains(&tool_id) {
        return Err(AuditError::ToolNotInSession { session_id: session.id, tool_id });
    }
    Ok(())
}

/// Load a persisted session with current tool rows and per-tool progress.
/// Tools are returned in the snapshot order; tools that no longer exist are
/// dropped.
///
/// # Errors
///
/// `SessionNotFound` if absent.
pub async fn get_audit_session(pool: &PgPool, org_id: Uuid, session_id: Uuid) -> Result<AuditSessionView, AuditError> {
    let session = load_session(pool, org_id, session_id).await?;

    let tools = sqlx::query_as::<_, ToolRow>(&format!(
        "SELECT {TOOL_COLUMNS} FROM tools WHERE organization_id = $1 AND id = ANY($2)"
    ))
    .bind(org_id)
    .bind(&session.tool_ids)
    .fetch_all(pool)
    .await?;

    let audited: Vec<Uuid> =
        sqlx::query_scalar("SELECT DISTINCT tool_id FROM tool_audits WHERE audit_session_id = $1")
            .bind(session_id)
            .fetch_all(pool)
            .await?;

    let tools = order_session_tools(&session.tool_ids, tools, &audited.into_iter().collect());
    let audited_count = tools.iter().filter(|t| t.audited).count();
    Ok(AuditSessionView { session, tools, audited_count })
}

pub(crate) fn order_session_tools(
    order: &[Uuid],
    tools: Vec<ToolRow>,
    audited: &HashSet<Uuid>,
) -> Vec<AuditSessionTool> {
    let mut by_id: HashMap<Uuid, ToolRow> = tools.into_iter().map(|t| (t.id, t)).collect();
    order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|tool| {
            let audited = audited.contains(&tool.id);
            AuditSessionTool { tool, audited }
        })
        .collect()
}

/// Mark a session completed.
///
/// # Errors
///
/// `SessionNotFound` if absent, `SessionCompleted` if already completed.
pub async fn complete_session(pool: &PgPool, org_id: Uuid, session_id: Uuid) -> Result<AuditSession, AuditError> {
    let record = sqlx::query_as::<_, AuditSessionRecord>(&format!(
        "UPDATE audit_sessions SET completed_at = $3 \
         WHERE id = $1 AND organization_id = $2 AND completed_at IS NULL \
         RETURNING {SESSION_COLUMNS}"
    ))
    .bind(session_id)
    .bind(org_id)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?;

    match record {
        Some(record) => {
            info!(%org_id, %session_id, "audit session completed");
            Ok(record.into())
        }
        None => {
            load_session(pool, org_id, session_id).await?;
            Err(AuditError::SessionCompleted(session_id))
        }
    }
}

// =============================================================================
// PER-TOOL RESULTS
// =============================================================================

/// Record one tool's audit result and update the tool.
///
/// # Errors
///
/// `ToolNotFound`, `SessionNotFound`, `SessionCompleted`, or
/// `ToolNotInSession` as appropriate.
pub async fn record_tool_audit(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
    tool_id: Uuid,
    request: ToolAuditRequest,
) -> Result<ToolAuditRow, AuditError> {
    if request.photo_urls.iter().any(|url| url.trim().is_empty()) {
        return Err(AuditError::Validation("photo_urls must not contain blank entries".into()));
    }

    let now = now_ms();
    let mut tx = pool.begin().await?;
    // Held until commit so `complete_session` cannot close the session in between.
    if let Some(session_id) = request.audit_session_id {
        let session = lock_session(tx.as_mut(), org_id, session_id).await?;
        if let Err(e) = ensure_session_accepts(&session, tool_id) {
            warn!(%session_id, %tool_id, error = %e, "audit result rejected by session");
            return Err(e);
        }
    }
    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM tools WHERE id = $1 AND organization_id = $2 FOR UPDATE")
            .bind(tool_id)
            .bind(org_id)
            .fetch_optional(tx.as_mut())
            .await?;
    let current = current
        .as_deref()
        .and_then(ToolStatus::parse)
        .ok_or(AuditError::ToolNotFound(tool_id))?;
    let next = status_after_audit(current, request.found);
    let condition = request.condition.as_deref().map(str::trim).filter(|c| !c.is_empty());

    sqlx::query(
        "UPDATE tools SET status = $3, last_audited_at = $4, condition = COALESCE($5, condition), updated_at = $4
         WHERE id = $1 AND organization_id = $2",
    )
    .bind(tool_id)
    .bind(org_id)
    .bind(next.as_str())
    .bind(now)
    .bind(condition)
    .execute(tx.as_mut())
    .await?;

    let row = sqlx::query_as::<_, ToolAuditRow>(&format!(
        "INSERT INTO tool_audits (id, organization_id, audit_session_id, tool_id, audited_by, found, condition, \
             notes, photo_urls, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING {TOOL_AUDIT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(request.audit_session_id)
    .bind(tool_id)
    .bind(user_id)
    .bind(request.found)
    .bind(condition)
    .bind(request.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(Json(&request.photo_urls))
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %tool_id, found = request.found, status = next.as_str(), "tool audit recorded");
    Ok(row)
}

/// Audit history for one tool, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_tool_audits(pool: &PgPool, org_id: Uuid, tool_id: Uuid) -> Result<Vec<ToolAuditRow>, AuditError> {
    let rows = sqlx::query_as::<_, ToolAuditRow>(&format!(
        "SELECT {TOOL_AUDIT_COLUMNS} FROM tool_audits \
         WHERE organization_id = $1 AND tool_id = $2 \
         ORDER BY created_at DESC"
    ))
    .bind(org_id)
    .bind(tool_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "audit_test.rs"]
mod tests;
