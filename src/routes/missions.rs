//! Mission and task routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::mission::{
    self, MissionError, MissionRow, MissionUpdate, MissionWithTasks, NewMission, NewTask, TaskRow,
};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn mission_error_to_status(err: MissionError) -> StatusCode {
    match err {
        MissionError::NotFound(_) | MissionError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        MissionError::Forbidden(_) => StatusCode::FORBIDDEN,
        MissionError::InvalidTransition { .. } => StatusCode::CONFLICT,
        MissionError::Validation(_) => StatusCode::BAD_REQUEST,
        MissionError::Database(e) => {
            error!(error = %e, "mission query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MissionListQuery {
    pub status: Option<String>,
}

/// Single-field edit: `{ "field": "title", "value": "..." }`.
#[derive(Deserialize)]
pub struct FieldPatchBody {
    pub field: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ReorderBody {
    pub order: Vec<Uuid>,
}

/// `GET /api/orgs/{org_id}/missions?status=`
pub async fn list_missions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(query): Query<MissionListQuery>,
) -> Result<Json<Vec<MissionRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = mission::list_missions(&state.pool, org_id, query.status.as_deref())
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/missions`: create a mission with its initial tasks.
pub async fn create_mission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewMission>,
) -> Result<(StatusCode, Json<MissionWithTasks>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let created = mission::create_mission(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(mission_error_to_status)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/orgs/{org_id}/missions/{mission_id}`
pub async fn get_mission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MissionWithTasks>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let found = mission::get_mission(&state.pool, org_id, mission_id)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(found))
}

/// `PUT /api/orgs/{org_id}/missions/{mission_id}`
pub async fn update_mission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<MissionUpdate>,
) -> Result<Json<MissionRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::update_mission(&state.pool, org_id, mission_id, body)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(row))
}

/// `PATCH /api/orgs/{org_id}/missions/{mission_id}`
pub async fn patch_mission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<FieldPatchBody>,
) -> Result<Json<MissionRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::patch_mission_field(&state.pool, org_id, mission_id, &body.field, &body.value)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(row))
}

/// `POST /api/orgs/{org_id}/missions/{mission_id}/status`
pub async fn change_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<StatusBody>,
) -> Result<Json<MissionRow>, StatusCode> {
    let role = authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::change_status(&state.pool, org_id, mission_id, &body.status, auth.user.id, role)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(row))
}

/// `DELETE /api/orgs/{org_id}/missions/{mission_id}` (lead).
pub async fn delete_mission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    mission::delete_mission(&state.pool, org_id, mission_id)
        .await
        .map_err(mission_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// TASKS
// =============================================================================

/// `POST /api/orgs/{org_id}/missions/{mission_id}/tasks`: append a task.
pub async fn add_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<TaskRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::add_task(&state.pool, org_id, mission_id, body)
        .await
        .map_err(mission_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `PUT /api/orgs/{org_id}/missions/{mission_id}/tasks/{task_id}`
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id, task_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(body): Json<NewTask>,
) -> Result<Json<TaskRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::update_task(&state.pool, org_id, mission_id, task_id, body)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(row))
}

/// `PATCH /api/orgs/{org_id}/missions/{mission_id}/tasks/{task_id}`
pub async fn patch_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id, task_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(body): Json<FieldPatchBody>,
) -> Result<Json<TaskRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = mission::patch_task_field(&state.pool, org_id, mission_id, task_id, &body.field, &body.value)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(row))
}

/// `DELETE /api/orgs/{org_id}/missions/{mission_id}/tasks/{task_id}`
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id, task_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    mission::delete_task(&state.pool, org_id, mission_id, task_id)
        .await
        .map_err(mission_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/orgs/{org_id}/missions/{mission_id}/tasks/order`
pub async fn reorder_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, mission_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<Vec<TaskRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let rows = mission::reorder_tasks(&state.pool, org_id, mission_id, &body.order)
        .await
        .map_err(mission_error_to_status)?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mission_error_to_status_maps_variants() {
        let id = Uuid::nil();
        assert_eq!(mission_error_to_status(MissionError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(mission_error_to_status(MissionError::TaskNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(mission_error_to_status(MissionError::Forbidden("qa".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            mission_error_to_status(MissionError::InvalidTransition { from: "planning", to: "completed" }),
            StatusCode::CONFLICT
        );
        assert_eq!(mission_error_to_status(MissionError::Validation("title".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn field_patch_value_defaults_to_null() {
        let body: FieldPatchBody = serde_json::from_str(r#"{"field":"qa_assignee"}"#).unwrap();
        assert_eq!(body.field, "qa_assignee");
        assert!(body.value.is_null());
    }
}
