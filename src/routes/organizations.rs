//! Organization, membership, and member-attribute routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::organization::{
    self, MemberAttribute, MemberRow, OrgError, OrgPermission, OrgRole, OrganizationRow, OrganizationUpdate,
};
use crate::state::AppState;

/// Require `permission` in the organization for the caller; returns their role.
pub(crate) async fn authorize(
    state: &AppState,
    org_id: Uuid,
    auth: &AuthUser,
    permission: OrgPermission,
) -> Result<OrgRole, StatusCode> {
    organization::ensure_permission(&state.pool, org_id, auth.user.id, permission)
        .await
        .map_err(org_error_to_status)
}

pub(crate) fn org_error_to_status(err: OrgError) -> StatusCode {
    match err {
        OrgError::NotFound(_) | OrgError::MemberNotFound(_) => StatusCode::NOT_FOUND,
        OrgError::Forbidden(_) => StatusCode::FORBIDDEN,
        OrgError::Conflict(_) => StatusCode::CONFLICT,
        OrgError::Validation(_) => StatusCode::BAD_REQUEST,
        OrgError::Database(e) => {
            error!(error = %e, "organization query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
pub struct OrganizationResponse {
    #[serde(flatten)]
    pub organization: OrganizationRow,
    pub role: OrgRole,
}

#[derive(Deserialize)]
pub struct CreateOrganizationBody {
    pub name: String,
    pub subdomain: String,
}

/// `POST /api/orgs`: create an organization; caller becomes admin.
pub async fn create_organization(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateOrganizationBody>,
) -> Result<(StatusCode, Json<OrganizationResponse>), StatusCode> {
    let organization = organization::create_organization(&state.pool, &body.name, &body.subdomain, auth.user.id)
        .await
        .map_err(org_error_to_status)?;
    Ok((StatusCode::CREATED, Json(OrganizationResponse { organization, role: OrgRole::Admin })))
}

/// `GET /api/orgs`: organizations the caller belongs to.
pub async fn list_organizations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<OrganizationResponse>>, StatusCode> {
    let rows = organization::list_organizations(&state.pool, auth.user.id)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(
        rows.into_iter()
            .map(|(organization, role)| OrganizationResponse { organization, role })
            .collect(),
    ))
}

/// `GET /api/orgs/{org_id}`: fetch one organization.
pub async fn get_organization(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OrganizationResponse>, StatusCode> {
    let role = authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let organization = organization::get_organization(&state.pool, org_id)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(OrganizationResponse { organization, role }))
}

/// `PATCH /api/orgs/{org_id}`: update organization metadata (admin).
pub async fn update_organization(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<OrganizationUpdate>,
) -> Result<Json<OrganizationResponse>, StatusCode> {
    let role = authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    let organization = organization::update_organization(&state.pool, org_id, body)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(OrganizationResponse { organization, role }))
}

// =============================================================================
// MEMBERS
// =============================================================================

#[derive(Deserialize)]
pub struct UpsertMemberBody {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateMemberBody {
    pub role: String,
}

/// `GET /api/orgs/{org_id}/members`: list members.
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<MemberRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = organization::list_members(&state.pool, org_id)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/members`: add a member by id or email (admin).
pub async fn upsert_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<UpsertMemberBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    let Some(role) = OrgRole::parse(&body.role) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let target_user_id = match (body.user_id, body.email.as_deref()) {
        (Some(user_id), _) => user_id,
        (None, Some(email)) => organization::find_user_by_email(&state.pool, email)
            .await
            .map_err(org_error_to_status)?
            .ok_or(StatusCode::NOT_FOUND)?,
        (None, None) => return Err(StatusCode::BAD_REQUEST),
    };

    organization::upsert_member(&state.pool, org_id, target_user_id, role)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(serde_json::json!({ "ok": true, "user_id": target_user_id })))
}

/// `PATCH /api/orgs/{org_id}/members/{user_id}`: change a member's role (admin).
pub async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, member_user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    let Some(role) = OrgRole::parse(&body.role) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    if organization::member_role(&state.pool, org_id, member_user_id)
        .await
        .map_err(org_error_to_status)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }
    organization::upsert_member(&state.pool, org_id, member_user_id, role)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /api/orgs/{org_id}/members/{user_id}`: remove a member (admin).
pub async fn delete_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, member_user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    organization::remove_member(&state.pool, org_id, member_user_id)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// `GET /api/orgs/{org_id}/members/{user_id}/attributes`: member skill levels.
pub async fn list_attributes(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, member_user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<MemberAttribute>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = organization::list_member_attributes(&state.pool, org_id, member_user_id)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(rows))
}

/// `PUT /api/orgs/{org_id}/members/{user_id}/attributes`: replace skill levels (lead).
pub async fn set_attributes(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, member_user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<Vec<MemberAttribute>>,
) -> Result<Json<Vec<MemberAttribute>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let rows = organization::set_member_attributes(&state.pool, org_id, member_user_id, &body)
        .await
        .map_err(org_error_to_status)?;
    Ok(Json(rows))
}
