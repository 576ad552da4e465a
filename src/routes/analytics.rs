//! Dashboard analytics route.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::analytics::{self, AnalyticsSummary};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

/// `GET /api/orgs/{org_id}/analytics`
pub async fn summary(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<AnalyticsSummary>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let summary = analytics::summary(&state.pool, org_id).await.map_err(|e| {
        error!(error = %e, %org_id, "analytics query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(summary))
}
