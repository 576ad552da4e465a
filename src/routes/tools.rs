//! Tool inventory routes, including JSONL export and import.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::db::now_ms;
use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::organization::OrgPermission;
use crate::services::tool::{self, NewTool, ToolError, ToolFilter, ToolRow, ToolUpdate};
use crate::state::AppState;

pub(crate) fn tool_error_to_status(err: ToolError) -> StatusCode {
    match err {
        ToolError::NotFound(_) => StatusCode::NOT_FOUND,
        ToolError::Validation(_) => StatusCode::BAD_REQUEST,
        ToolError::Database(e) => {
            error!(error = %e, "tool query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /api/orgs/{org_id}/tools`: list tools with optional filters.
pub async fn list_tools(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(filter): Query<ToolFilter>,
) -> Result<Json<Vec<ToolRow>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = tool::list_tools(&state.pool, org_id, &filter)
        .await
        .map_err(tool_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/tools`: create a tool (admin).
pub async fn create_tool(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewTool>,
) -> Result<(StatusCode, Json<ToolRow>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;
    let row = tool::create_tool(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(tool_error_to_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/orgs/{org_id}/tools/{tool_id}`: fetch one tool.
pub async fn get_tool(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ToolRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let row = tool::get_tool(&state.pool, org_id, tool_id)
        .await
        .map_err(tool_error_to_status)?;
    Ok(Json(row))
}

/// `PATCH /api/orgs/{org_id}/tools/{tool_id}`: update tool fields.
pub async fn update_tool(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, tool_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ToolUpdate>,
) -> Result<Json<ToolRow>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let row = tool::update_tool(&state.pool, org_id, tool_id, body)
        .await
        .map_err(tool_error_to_status)?;
    Ok(Json(row))
}

// =============================================================================
// JSONL
// =============================================================================

/// `GET /api/orgs/{org_id}/tools/export.jsonl`: stream the inventory as JSONL.
pub async fn export_jsonl(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let tools = tool::list_tools(&state.pool, org_id, &ToolFilter::default())
        .await
        .map_err(tool_error_to_status)?;
    let lines = tool::export_lines(org_id, &tools, now_ms()).map_err(|e| {
        error!(error = %e, "tool export serialization failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let stream = futures::stream::iter(
        lines
            .into_iter()
            .map(|line| Ok::<axum::body::Bytes, std::convert::Infallible>(axum::body::Bytes::from(line))),
    );
    let body = axum::body::Body::from_stream(stream);
    let filename = format!("tools-{org_id}.jsonl");

    Ok((
        [
            (CONTENT_TYPE, "application/x-ndjson; charset=utf-8"),
            (CONTENT_DISPOSITION, &format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct ImportJsonlBody {
    pub jsonl: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ImportJsonlResponse {
    pub imported: usize,
    pub skipped: usize,
}

/// Split an import payload into valid new tools and a count of skipped lines.
pub(crate) fn collect_import(jsonl: &str) -> (Vec<NewTool>, usize) {
    let mut tools = Vec::new();
    let mut skipped = 0_usize;
    for raw_line in jsonl.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = tool::parse_import_line(line)
            .ok()
            .flatten()
            .and_then(|new_tool| tool::validate_new_tool(new_tool).ok());
        match parsed {
            Some(new_tool) => tools.push(new_tool),
            None => skipped = skipped.saturating_add(1),
        }
    }
    (tools, skipped)
}

/// `POST /api/orgs/{org_id}/tools/import.jsonl`: bulk import (admin).
pub async fn import_jsonl(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<ImportJsonlBody>,
) -> Result<Json<ImportJsonlResponse>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Admin).await?;

    let (tools, skipped) = collect_import(&body.jsonl);
    if tools.is_empty() {
        return Ok(Json(ImportJsonlResponse { imported: 0, skipped }));
    }
    let rows = tool::insert_tools(&state.pool, org_id, auth.user.id, tools)
        .await
        .map_err(tool_error_to_status)?;

    info!(%org_id, imported = rows.len(), skipped, "tool import finished");
    Ok(Json(ImportJsonlResponse { imported: rows.len(), skipped }))
}

#[cfg(test)]
#[path = "tools_test.rs"]
mod tests;
