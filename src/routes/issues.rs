//! Tool issue routes: reporting, workflow, assignment, and skill requirements.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::issue::{
    self, AdvanceIssue, IssueDetail, IssueError, IssueFilter, IssueRequirement, IssueRow, QualificationReport,
    ReportIssue,
};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn issue_error_to_status(err: IssueError) -> StatusCode {
    match err {
        IssueError::NotFound(_) | IssueError::ToolNotFound(_) => StatusCode::NOT_FOUND,
        IssueError::InvalidTransition { .. } | IssueError::Conflict(_) => StatusCode::CONFLICT,
        IssueError::NotAMember(_) | IssueError::Validation(_) => StatusCode::BAD_REQUEST,
        IssueError::Database(e) => {
            error!(error = %e, "issue query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub assigned_to: Option<Uuid>,
}

/// `GET /api/orgs/{org_id}/issues?workflow_status=&tool_id=`
pub async fn list_issues(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<Vec<IssueRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = issue::list_issues(&state.pool, org_id, &filter)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/issues`: report a problem with a tool.
pub async fn report_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<ReportIssue>,
) -> Result<(StatusCode, Json<IssueRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = issue::report_issue(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(issue_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/orgs/{org_id}/issues/{issue_id}`
pub async fn get_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, issue_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<IssueDetail>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let detail = issue::get_issue(&state.pool, org_id, issue_id)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(detail))
}

/// `POST /api/orgs/{org_id}/issues/{issue_id}/advance`: one workflow step.
pub async fn advance_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, issue_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<AdvanceIssue>,
) -> Result<Json<IssueRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = issue::advance_issue(&state.pool, org_id, issue_id, body)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(row))
}

/// `PUT /api/orgs/{org_id}/issues/{issue_id}/assignee` (lead).
pub async fn assign_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, issue_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<AssignBody>,
) -> Result<Json<IssueRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let row = issue::assign_issue(&state.pool, org_id, issue_id, body.assigned_to)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(row))
}

/// `PUT /api/orgs/{org_id}/issues/{issue_id}/requirements` (lead).
pub async fn set_requirements(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, issue_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<Vec<IssueRequirement>>,
) -> Result<Json<Vec<IssueRequirement>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Lead).await?;
    let rows = issue::set_requirements(&state.pool, org_id, issue_id, &body)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(rows))
}

/// `GET /api/orgs/{org_id}/issues/{issue_id}/qualification/{user_id}`
pub async fn check_qualification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, issue_id, user_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<QualificationReport>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let report = issue::check_qualification(&state.pool, org_id, issue_id, user_id)
        .await
        .map_err(issue_error_to_status)?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_error_to_status_maps_variants() {
        let id = Uuid::nil();
        assert_eq!(issue_error_to_status(IssueError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(issue_error_to_status(IssueError::ToolNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(issue_error_to_status(IssueError::NotAMember(id)), StatusCode::BAD_REQUEST);
        assert_eq!(
            issue_error_to_status(IssueError::InvalidTransition { from: "reported", to: "completed" }),
            StatusCode::CONFLICT
        );
        assert_eq!(issue_error_to_status(IssueError::Conflict("checked out".into())), StatusCode::CONFLICT);
        assert_eq!(issue_error_to_status(IssueError::Validation("x".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn assign_body_accepts_null_to_unassign() {
        let body: AssignBody = serde_json::from_str(r#"{"assigned_to":null}"#).unwrap();
        assert!(body.assigned_to.is_none());
    }
}
