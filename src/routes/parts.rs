//! Parts (consumable stock) routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::organization::OrgPermission;
use crate::services::part::{self, NewPart, PartError, PartHistoryRow, PartRow, PartUpdate, QuantityAdjustment};
use crate::state::AppState;

pub(crate) fn part_error_to_status(err: PartError) -> StatusCode {
    match err {
        PartError::NotFound(_) => StatusCode::NOT_FOUND,
        PartError::InsufficientStock { .. } => StatusCode::CONFLICT,
        PartError::Validation(_) => StatusCode::BAD_REQUEST,
        PartError::Database(e) => {
            error!(error = %e, "part query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
pub struct PartResponse {
    #[serde(flatten)]
    pub part: PartRow,
    pub low_stock: bool,
}

impl From<PartRow> for PartResponse {
    fn from(part: PartRow) -> Self {
        let low_stock = part::is_low_stock(&part);
        Self { part, low_stock }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PartListQuery {
    #[serde(default)]
    pub low_stock: bool,
}

/// `GET /api/orgs/{org_id}/parts?low_stock=true`
pub async fn list_parts(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(query): Query<PartListQuery>,
) -> Result<Json<Vec<PartResponse>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = part::list_parts(&state.pool, org_id, query.low_stock)
        .await
        .map_err(part_error_to_status)?;
    Ok(Json(rows.into_iter().map(PartResponse::from).collect()))
}

/// `POST /api/orgs/{org_id}/parts` (admin).
pub async fn create_part(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewPart>,
) -> Result<(StatusCode, Json<PartResponse>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    let row = part::create_part(&state.pool, org_id, body)
        .await
        .map_err(part_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

/// `GET /api/orgs/{org_id}/parts/{part_id}`
pub async fn get_part(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, part_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PartResponse>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let row = part::get_part(&state.pool, org_id, part_id)
        .await
        .map_err(part_error_to_status)?;
    Ok(Json(row.into()))
}

/// `PATCH /api/orgs/{org_id}/parts/{part_id}`: edit descriptive fields.
pub async fn update_part(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, part_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<PartUpdate>,
) -> Result<Json<PartResponse>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = part::update_part(&state.pool, org_id, part_id, body)
        .await
        .map_err(part_error_to_status)?;
    Ok(Json(row.into()))
}

/// `POST /api/orgs/{org_id}/parts/{part_id}/adjust`: add, remove, or recount stock.
pub async fn adjust_quantity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, part_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<QuantityAdjustment>,
) -> Result<Json<PartResponse>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = part::adjust_quantity(&state.pool, org_id, part_id, auth.user.id, body)
        .await
        .map_err(part_error_to_status)?;
    Ok(Json(row.into()))
}

/// `GET /api/orgs/{org_id}/parts/{part_id}/history`
pub async fn part_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, part_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<PartHistoryRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = part::part_history(&state.pool, org_id, part_id)
        .await
        .map_err(part_error_to_status)?;
    Ok(Json(rows))
}
