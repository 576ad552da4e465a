//! Exploration and policy routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::exploration::{
    self, ExplorationError, ExplorationRow, ExplorationUpdate, NewExploration, NewPolicy, PolicyRow, PolicyUpdate,
};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn exploration_error_to_status(err: ExplorationError) -> StatusCode {
    match err {
        ExplorationError::NotFound(_) | ExplorationError::PolicyNotFound(_) => StatusCode::NOT_FOUND,
        ExplorationError::CodeTaken(_) => StatusCode::CONFLICT,
        ExplorationError::Validation(_) => StatusCode::BAD_REQUEST,
        ExplorationError::Database(e) => {
            error!(error = %e, "exploration query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
pub struct PolicyFromExplorationResponse {
    pub policy: PolicyRow,
    pub exploration: ExplorationRow,
}

#[derive(Deserialize)]
pub struct LinkPolicyBody {
    pub policy_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyListQuery {
    pub status: Option<String>,
}

/// `GET /api/orgs/{org_id}/explorations`
pub async fn list_explorations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<ExplorationRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = exploration::list_explorations(&state.pool, org_id)
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/explorations`: code is generated when omitted.
pub async fn create_exploration(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewExploration>,
) -> Result<(StatusCode, Json<ExplorationRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = exploration::create_exploration(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(exploration_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/orgs/{org_id}/explorations/{exploration_id}`
pub async fn get_exploration(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, exploration_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ExplorationRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let row = exploration::get_exploration(&state.pool, org_id, exploration_id)
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(row))
}

/// `PATCH /api/orgs/{org_id}/explorations/{exploration_id}`
pub async fn update_exploration(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, exploration_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ExplorationUpdate>,
) -> Result<Json<ExplorationRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = exploration::update_exploration(&state.pool, org_id, exploration_id, body)
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(row))
}

/// `POST /api/orgs/{org_id}/explorations/{exploration_id}/policy`: create and link (lead).
pub async fn create_policy_from_exploration(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, exploration_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<NewPolicy>,
) -> Result<(StatusCode, Json<PolicyFromExplorationResponse>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let (policy, exploration) =
        exploration::create_policy_from_exploration(&state.pool, org_id, exploration_id, auth.user.id, body)
            .await
            .map_err(exploration_error_to_status)?;
    Ok((StatusCode::CREATED, Json(PolicyFromExplorationResponse { policy, exploration })))
}

/// `PUT /api/orgs/{org_id}/explorations/{exploration_id}/policy`: link an
/// existing policy, or unlink with `{"policy_id": null}` (lead).
pub async fn set_policy_link(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, exploration_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<LinkPolicyBody>,
) -> Result<Json<ExplorationRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let result = match body.policy_id {
        Some(policy_id) => exploration::link_policy(&state.pool, org_id, exploration_id, policy_id).await,
        None => exploration::unlink_policy(&state.pool, org_id, exploration_id).await,
    };
    result.map(Json).map_err(exploration_error_to_status)
}

// =============================================================================
// POLICIES
// =============================================================================

/// `GET /api/orgs/{org_id}/policies?status=`
pub async fn list_policies(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(query): Query<PolicyListQuery>,
) -> Result<Json<Vec<PolicyRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = exploration::list_policies(&state.pool, org_id, query.status.as_deref())
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/policies` (lead).
pub async fn create_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewPolicy>,
) -> Result<(StatusCode, Json<PolicyRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let row = exploration::create_policy(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(exploration_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/orgs/{org_id}/policies/{policy_id}`
pub async fn get_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PolicyRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let row = exploration::get_policy(&state.pool, org_id, policy_id)
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(row))
}

/// `PATCH /api/orgs/{org_id}/policies/{policy_id}` (lead).
pub async fn update_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, policy_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<PolicyUpdate>,
) -> Result<Json<PolicyRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let row = exploration::update_policy(&state.pool, org_id, policy_id, body)
        .await
        .map_err(exploration_error_to_status)?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exploration_error_to_status_maps_variants() {
        assert_eq!(exploration_error_to_status(ExplorationError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(exploration_error_to_status(ExplorationError::PolicyNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            exploration_error_to_status(ExplorationError::CodeTaken("EX-20260101-01".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(exploration_error_to_status(ExplorationError::Validation("title".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn link_body_null_means_unlink() {
        let body: LinkPolicyBody = serde_json::from_str(r#"{"policy_id":null}"#).unwrap();
        assert!(body.policy_id.is_none());
        let id = Uuid::new_v4();
        let body: LinkPolicyBody = serde_json::from_value(serde_json::json!({ "policy_id": id })).unwrap();
        assert_eq!(body.policy_id, Some(id));
    }
}
