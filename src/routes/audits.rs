//! Vicinity summaries, audit sessions, and per-tool audit results.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::audit::{
    self, AuditError, AuditSession, AuditSessionView, ToolAuditRequest, ToolAuditRow, VicinitySummary,
};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn audit_error_to_status(err: AuditError) -> StatusCode {
    match err {
        AuditError::SessionNotFound(_) | AuditError::ToolNotFound(_) => StatusCode::NOT_FOUND,
        AuditError::SessionCompleted(_) => StatusCode::CONFLICT,
        AuditError::ToolNotInSession { .. } | AuditError::Validation(_) => StatusCode::BAD_REQUEST,
        AuditError::Database(e) => {
            error!(error = %e, "audit query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize)]
pub struct GenerateAuditBody {
    pub vicinity: String,
    pub quantity: Option<i64>,
}

/// `GET /api/orgs/{org_id}/audits/vicinities`
pub async fn list_vicinities(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<VicinitySummary>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = audit::list_vicinities(&state.pool, org_id)
        .await
        .map_err(audit_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/audits`: pick a randomized audit set for a vicinity.
pub async fn generate_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<GenerateAuditBody>,
) -> Result<(StatusCode, Json<AuditSessionView>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let view = audit::generate_audit(&state.pool, org_id, auth.user.id, &body.vicinity, body.quantity)
        .await
        .map_err(audit_error_to_status)?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/orgs/{org_id}/audits/{session_id}`
pub async fn get_audit_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AuditSessionView>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let view = audit::get_audit_session(&state.pool, org_id, session_id)
        .await
        .map_err(audit_error_to_status)?;
    Ok(Json(view))
}

/// `POST /api/orgs/{org_id}/audits/{session_id}/complete`
pub async fn complete_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AuditSession>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let session = audit::complete_session(&state.pool, org_id, session_id)
        .await
        .map_err(audit_error_to_status)?;
    Ok(Json(session))
}

/// `POST /api/orgs/{org_id}/tools/{tool_id}/audits`: record found/missing.
pub async fn record_tool_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ToolAuditRequest>,
) -> Result<(StatusCode, Json<ToolAuditRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = audit::record_tool_audit(&state.pool, org_id, auth.user.id, tool_id, body)
        .await
        .map_err(audit_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/orgs/{org_id}/tools/{tool_id}/audits`
pub async fn list_tool_audits(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<ToolAuditRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = audit::list_tool_audits(&state.pool, org_id, tool_id)
        .await
        .map_err(audit_error_to_status)?;
    Ok(Json(rows))
}
