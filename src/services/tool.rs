//! Tool inventory CRUD with filtering and JSONL import/export.
//!
//! DESIGN
//! ======
//! Tools are never deleted; retiring a tool means marking it `unavailable`.
//! Status moves between the four values below, and checkout/audit/issue
//! services drive most transitions. Direct edits may set any valid status
//! except `checked_out`, which only the checkout service assigns so every
//! checked-out tool has exactly one open checkout row.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::db::now_ms;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(Uuid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Available,
    CheckedOut,
    Unavailable,
    UnableToFind,
}

impl ToolStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::CheckedOut => "checked_out",
            Self::Unavailable => "unavailable",
            Self::UnableToFind => "unable_to_find",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "available" => Some(Self::Available),
            "checked_out" => Some(Self::CheckedOut),
            "unavailable" => Some(Self::Unavailable),
            "unable_to_find" => Some(Self::UnableToFind),
            _ => None,
        }
    }
}

/// Row from the `tools` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ToolRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub status: String,
    pub storage_vicinity: Option<String>,
    pub storage_location: Option<String>,
    pub serial_number: Option<String>,
    pub manual_url: Option<String>,
    pub image_url: Option<String>,
    pub last_audited_at: Option<i64>,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) const TOOL_COLUMNS: &str = "id, organization_id, name, description, category, condition, status, \
     storage_vicinity, storage_location, serial_number, manual_url, image_url, last_audited_at, \
     created_by, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTool {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub status: Option<String>,
    pub storage_vicinity: Option<String>,
    pub storage_location: Option<String>,
    pub serial_number: Option<String>,
    pub manual_url: Option<String>,
    pub image_url: Option<String>,
}

/// Partial update. `Some(None)` clears an optional column.
#[derive(Debug, Default, Deserialize)]
pub struct ToolUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub condition: Option<Option<String>>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub storage_vicinity: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub storage_location: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub serial_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub manual_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub image_url: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolFilter {
    pub status: Option<String>,
    pub category: Option<String>,
    pub vicinity: Option<String>,
    /// Case-insensitive substring match on name, serial number, or description.
    pub search: Option<String>,
}

// =============================================================================
// VALIDATION
// =============================================================================

fn clean_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

/// Parse a status supplied by a client edit. `checked_out` is reserved for
/// the checkout flow.
pub(crate) fn parse_editable_status(raw: &str) -> Result<ToolStatus, ToolError> {
    match ToolStatus::parse(raw) {
        Some(ToolStatus::CheckedOut) => {
            Err(ToolError::Validation("status checked_out is set by the checkout flow".into()))
        }
        Some(status) => Ok(status),
        None => Err(ToolError::Validation(format!("unknown tool status: {raw}"))),
    }
}

pub(crate) fn validate_new_tool(tool: NewTool) -> Result<NewTool, ToolError> {
    let name = tool.name.trim().to_owned();
    if name.is_empty() {
        return Err(ToolError::Validation("name is required".into()));
    }
    let status = match tool.status.as_deref() {
        Some(raw) => Some(parse_editable_status(raw)?.as_str().to_owned()),
        None => None,
    };
    Ok(NewTool {
        name,
        description: clean_optional(tool.description),
        category: clean_optional(tool.category),
        condition: clean_optional(tool.condition),
        status,
        storage_vicinity: clean_optional(tool.storage_vicinity),
        storage_location: clean_optional(tool.storage_location),
        serial_number: clean_optional(tool.serial_number),
        manual_url: clean_optional(tool.manual_url),
        image_url: clean_optional(tool.image_url),
    })
}

/// Apply a partial update onto a loaded row.
pub(crate) fn apply_update(row: &mut ToolRow, update: ToolUpdate) -> Result<(), ToolError> {
    if let Some(name) = update.name {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(ToolError::Validation("name is required".into()));
        }
        row.name = name;
    }
    if let Some(status) = update.status.as_deref() {
        let status = parse_editable_status(status)?;
        if row.status == ToolStatus::CheckedOut.as_str() {
            return Err(ToolError::Validation("tool is checked out; check it in first".into()));
        }
        row.status = status.as_str().to_owned();
    }
    if let Some(v) = update.description {
        row.description = clean_optional(v);
    }
    if let Some(v) = update.category {
        row.category = clean_optional(v);
    }
    if let Some(v) = update.condition {
        row.condition = clean_optional(v);
    }
    if let Some(v) = update.storage_vicinity {
        row.storage_vicinity = clean_optional(v);
    }
    if let Some(v) = update.storage_location {
        row.storage_location = clean_optional(v);
    }
    if let Some(v) = update.serial_number {
        row.serial_number = clean_optional(v);
    }
    if let Some(v) = update.manual_url {
        row.manual_url = clean_optional(v);
    }
    if let Some(v) = update.image_url {
        row.image_url = clean_optional(v);
    }
    Ok(())
}

// =============================================================================
// CRUD
// =============================================================================

/// Insert a batch of validated tools in one transaction.
///
/// # Errors
///
/// Returns a database error if any insert fails; nothing is written then.
pub async fn insert_tools(
    pool: &PgPool,
    org_id: Uuid,
    created_by: Uuid,
    tools: Vec<NewTool>,
) -> Result<Vec<ToolRow>, ToolError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;
    let mut out = Vec::with_capacity(tools.len());
    for tool in tools {
        let row = sqlx::query_as::<_, ToolRow>(&format!(
            "INSERT INTO tools (id, organization_id, name, description, category, condition, status, \
                 storage_vicinity, storage_location, serial_number, manual_url, image_url, created_by, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14) \
             RETURNING {TOOL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(&tool.category)
        .bind(&tool.condition)
        .bind(tool.status.as_deref().unwrap_or(ToolStatus::Available.as_str()))
        .bind(&tool.storage_vicinity)
        .bind(&tool.storage_location)
        .bind(&tool.serial_number)
        .bind(&tool.manual_url)
        .bind(&tool.image_url)
        .bind(created_by)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;
        out.push(row);
    }
    tx.commit().await?;
    Ok(out)
}

/// Create one tool.
///
/// # Errors
///
/// `Validation` for a blank name or bad status.
pub async fn create_tool(pool: &PgPool, org_id: Uuid, created_by: Uuid, tool: NewTool) -> Result<ToolRow, ToolError> {
    let tool = validate_new_tool(tool)?;
    let mut rows = insert_tools(pool, org_id, created_by, vec![tool]).await?;
    let row = rows.pop().ok_or_else(|| ToolError::Validation("insert returned no row".into()))?;
    info!(%org_id, tool_id = %row.id, name = %row.name, "tool created");
    Ok(row)
}

/// Fetch one tool within an organization.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_tool(pool: &PgPool, org_id: Uuid, tool_id: Uuid) -> Result<ToolRow, ToolError> {
    sqlx::query_as::<_, ToolRow>(&format!(
        "SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1 AND organization_id = $2"
    ))
    .bind(tool_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ToolError::NotFound(tool_id))
}

/// List tools matching a filter, ordered by name.
///
/// # Errors
///
/// `Validation` for an unknown status filter.
pub async fn list_tools(pool: &PgPool, org_id: Uuid, filter: &ToolFilter) -> Result<Vec<ToolRow>, ToolError> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {TOOL_COLUMNS} FROM tools WHERE organization_id = "));
    builder.push_bind(org_id);

    if let Some(status) = filter.status.as_deref().filter(|s| !s.is_empty()) {
        let status =
            ToolStatus::parse(status).ok_or_else(|| ToolError::Validation(format!("unknown tool status: {status}")))?;
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = filter.category.as_deref().filter(|s| !s.is_empty()) {
        builder.push(" AND category = ").push_bind(category.to_owned());
    }
    if let Some(vicinity) = filter.vicinity.as_deref().filter(|s| !s.is_empty()) {
        builder.push(" AND storage_vicinity = ").push_bind(vicinity.to_owned());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR serial_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    builder.push(" ORDER BY name ASC, id ASC");

    let rows = builder.build_query_as::<ToolRow>().fetch_all(pool).await?;
    Ok(rows)
}

pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Apply a partial update and persist it.
///
/// The row is locked for the whole read-modify-write so a concurrent
/// checkout cannot be overwritten. `status` is only written when the update
/// names it.
///
/// # Errors
///
/// `NotFound` if absent, `Validation` for bad fields.
pub async fn update_tool(pool: &PgPool, org_id: Uuid, tool_id: Uuid, update: ToolUpdate) -> Result<ToolRow, ToolError> {
    let mut tx = pool.begin().await?;
    let mut row = sqlx::query_as::<_, ToolRow>(&format!(
        "SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1 AND organization_id = $2 FOR UPDATE"
    ))
    .bind(tool_id)
    .bind(org_id)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(ToolError::NotFound(tool_id))?;

    let sets_status = update.status.is_some();
    apply_update(&mut row, update)?;
    row.updated_at = now_ms();

    let row = sqlx::query_as::<_, ToolRow>(&format!(
        "UPDATE tools SET name = $3, description = $4, category = $5, condition = $6, \
             status = COALESCE($7, status), storage_vicinity = $8, storage_location = $9, \
             serial_number = $10, manual_url = $11, image_url = $12, updated_at = $13 \
         WHERE id = $1 AND organization_id = $2 \
         RETURNING {TOOL_COLUMNS}"
    ))
    .bind(tool_id)
    .bind(org_id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.category)
    .bind(&row.condition)
    .bind(sets_status.then(|| row.status.clone()))
    .bind(&row.storage_vicinity)
    .bind(&row.storage_location)
    .bind(&row.serial_number)
    .bind(&row.manual_url)
    .bind(&row.image_url)
    .bind(row.updated_at)
    .fetch_one(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %tool_id, status = %row.status, "tool updated");
    Ok(row)
}

// =============================================================================
// JSONL EXPORT / IMPORT
// =============================================================================

#[derive(Serialize)]
pub struct ToolExportMetaLine {
    #[serde(rename = "type")]
    pub line_type: &'static str,
    pub version: u32,
    pub organization_id: Uuid,
    pub exported_at_ms: i64,
    pub tool_count: usize,
}

#[derive(Serialize)]
pub struct ToolExportLine<'a> {
    #[serde(rename = "type")]
    pub line_type: &'static str,
    #[serde(flatten)]
    pub tool: &'a ToolRow,
}

/// Render an inventory export: one meta line, then one line per tool.
///
/// # Errors
///
/// Returns a serialization error if a row cannot be encoded.
pub fn export_lines(org_id: Uuid, tools: &[ToolRow], exported_at_ms: i64) -> Result<Vec<String>, serde_json::Error> {
    let mut lines = Vec::with_capacity(tools.len() + 1);
    let meta = ToolExportMetaLine {
        line_type: "tool_export_meta",
        version: 1,
        organization_id: org_id,
        exported_at_ms,
        tool_count: tools.len(),
    };
    lines.push(format!("{}\n", serde_json::to_string(&meta)?));
    for tool in tools {
        let line = ToolExportLine { line_type: "tool", tool };
        lines.push(format!("{}\n", serde_json::to_string(&line)?));
    }
    Ok(lines)
}

/// Parse one import line into a new tool. Meta lines, non-objects, lines of
/// another type, and lines without a name yield `None`.
///
/// Status is carried over except `checked_out`, which imports as `available`
/// because no checkout row comes with it.
///
/// # Errors
///
/// Returns an error for malformed JSON.
pub fn parse_import_line(line: &str) -> Result<Option<NewTool>, serde_json::Error> {
    let value = serde_json::from_str::<serde_json::Value>(line)?;
    let Some(map) = value.as_object() else {
        return Ok(None);
    };

    let line_type = map.get("type").and_then(serde_json::Value::as_str);
    if line_type.is_some_and(|t| t != "tool") {
        return Ok(None);
    }

    let text = |key: &str| {
        map.get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let Some(name) = text("name") else {
        return Ok(None);
    };
    let status = text("status")
        .and_then(|raw| ToolStatus::parse(&raw))
        .map(|status| match status {
            ToolStatus::CheckedOut => ToolStatus::Available,
            other => other,
        })
        .map(|status| status.as_str().to_owned());

    Ok(Some(NewTool {
        name,
        description: text("description"),
        category: text("category"),
        condition: text("condition"),
        status,
        storage_vicinity: text("storage_vicinity"),
        storage_location: text("storage_location"),
        serial_number: text("serial_number"),
        manual_url: text("manual_url"),
        image_url: text("image_url"),
    }))
}

#[cfg(test)]
#[path = "tool_test.rs"]
mod tests;
