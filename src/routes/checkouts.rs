//! Checkout and check-in routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::checkout::{self, CheckinRequest, CheckoutError, CheckoutRequest, CheckoutRow};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn checkout_error_to_status(err: CheckoutError) -> StatusCode {
    match err {
        CheckoutError::ToolNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::NotAvailable { .. } | CheckoutError::NotCheckedOut(_) => StatusCode::CONFLICT,
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::Database(e) => {
            error!(error = %e, "checkout query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenCheckoutsQuery {
    #[serde(default)]
    pub overdue: bool,
}

/// `POST /api/orgs/{org_id}/tools/{tool_id}/checkout`
pub async fn checkout_tool(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = checkout::checkout_tool(&state.pool, org_id, tool_id, auth.user.id, &auth.user.name, body)
        .await
        .map_err(checkout_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `POST /api/orgs/{org_id}/tools/{tool_id}/checkin`
pub async fn checkin_tool(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CheckinRequest>,
) -> Result<Json<CheckoutRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = checkout::checkin_tool(&state.pool, org_id, tool_id, body)
        .await
        .map_err(checkout_error_to_status)?;
    Ok(Json(row))
}

/// `GET /api/orgs/{org_id}/tools/{tool_id}/checkouts`: full history, newest first.
pub async fn tool_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<CheckoutRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = checkout::tool_history(&state.pool, org_id, tool_id)
        .await
        .map_err(checkout_error_to_status)?;
    Ok(Json(rows))
}

/// `GET /api/orgs/{org_id}/checkouts?overdue=true`
pub async fn list_open_checkouts(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(query): Query<OpenCheckoutsQuery>,
) -> Result<Json<Vec<CheckoutRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = checkout::list_open_checkouts(&state.pool, org_id, query.overdue)
        .await
        .map_err(checkout_error_to_status)?;
    Ok(Json(rows))
}
