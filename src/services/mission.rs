//! Missions and their ordered tasks, including field-level auto-save.
//!
//! DESIGN
//! ======
//! A mission is created together with its initial tasks in one transaction.
//! Afterwards clients either send full-record updates or single-field patches
//! (the auto-save path). Single-field patches go through a whitelist so a
//! patch can never touch ownership or status columns.
//!
//! Task order is an explicit `position` column, dense from 0. New tasks are
//! appended; reorder takes a full permutation of the mission's task ids.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::organization::{OrgPermission, OrgRole};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("mission not found: {0}")]
    NotFound(Uuid),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Planning,
    InProgress,
    QaReview,
    Completed,
    Cancelled,
}

impl MissionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::QaReview => "qa_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "planning" => Some(Self::Planning),
            "in_progress" => Some(Self::InProgress),
            "qa_review" => Some(Self::QaReview),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether a mission may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::InProgress | Self::Cancelled)
                | (Self::InProgress, Self::Planning | Self::QaReview | Self::Cancelled)
                | (Self::QaReview, Self::InProgress | Self::Completed | Self::Cancelled)
                | (Self::Cancelled, Self::Planning)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Tool,
    Part,
}

/// A reference to a tool or part a mission needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// Part quantity a task consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRequirement {
    pub part_id: Uuid,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MissionRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub problem_statement: String,
    pub resources_required: Json<Vec<ResourceRef>>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub qa_assignee: Option<Uuid>,
    pub template_id: Option<String>,
    pub template_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

const MISSION_COLUMNS: &str = "id, organization_id, title, problem_statement, resources_required, status, \
     created_by, qa_assignee, template_id, template_name, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub mission_id: Uuid,
    pub position: i32,
    pub title: String,
    pub plan: String,
    pub observations: String,
    pub assigned_to: Option<Uuid>,
    pub estimated_duration: Option<String>,
    pub required_tools: Json<Vec<Uuid>>,
    pub required_stock: Json<Vec<StockRequirement>>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

const TASK_COLUMNS: &str = "id, mission_id, position, title, plan, observations, assigned_to, estimated_duration, \
     required_tools, required_stock, status, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
pub struct MissionWithTasks {
    #[serde(flatten)]
    pub mission: MissionRow,
    pub tasks: Vec<TaskRow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub observations: String,
    pub assigned_to: Option<Uuid>,
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub required_tools: Vec<Uuid>,
    #[serde(default)]
    pub required_stock: Vec<StockRequirement>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMission {
    pub title: String,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub resources_required: Vec<ResourceRef>,
    pub qa_assignee: Option<Uuid>,
    pub template_id: Option<String>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub tasks: Vec<NewTask>,
}

/// Full-record mission update. Status is changed through `change_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct MissionUpdate {
    pub title: String,
    pub problem_statement: String,
    pub resources_required: Vec<ResourceRef>,
    pub qa_assignee: Option<Uuid>,
    pub template_id: Option<String>,
    pub template_name: Option<String>,
}

/// Fields a mission auto-save patch may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionField {
    Title,
    ProblemStatement,
    ResourcesRequired,
    QaAssignee,
}

impl MissionField {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "title" => Some(Self::Title),
            "problem_statement" => Some(Self::ProblemStatement),
            "resources_required" => Some(Self::ResourcesRequired),
            "qa_assignee" => Some(Self::QaAssignee),
            _ => None,
        }
    }
}

/// Fields a task auto-save patch may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Title,
    Plan,
    Observations,
    AssignedTo,
    EstimatedDuration,
    RequiredTools,
    RequiredStock,
    Status,
}

impl TaskField {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "title" => Some(Self::Title),
            "plan" => Some(Self::Plan),
            "observations" => Some(Self::Observations),
            "assigned_to" => Some(Self::AssignedTo),
            "estimated_duration" => Some(Self::EstimatedDuration),
            "required_tools" => Some(Self::RequiredTools),
            "required_stock" => Some(Self::RequiredStock),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn require_title(raw: &str) -> Result<String, MissionError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(MissionError::Validation("title is required".into()));
    }
    Ok(title.to_owned())
}

pub(crate) fn validate_resources(resources: &[ResourceRef]) -> Result<(), MissionError> {
    for resource in resources {
        if let Some(quantity) = resource.quantity {
            if !quantity.is_finite() || quantity <= 0.0 {
                return Err(MissionError::Validation(format!("resource {} has invalid quantity", resource.id)));
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_stock(stock: &[StockRequirement]) -> Result<(), MissionError> {
    if stock.iter().any(|s| !s.quantity.is_finite() || s.quantity <= 0.0) {
        return Err(MissionError::Validation("required_stock quantities must be positive".into()));
    }
    Ok(())
}

fn parse_task_status(raw: Option<&str>) -> Result<TaskStatus, MissionError> {
    match raw {
        None => Ok(TaskStatus::NotStarted),
        Some(raw) => {
            TaskStatus::parse(raw).ok_or_else(|| MissionError::Validation(format!("unknown task status: {raw}")))
        }
    }
}

pub(crate) fn validate_task(task: &NewTask) -> Result<(String, TaskStatus), MissionError> {
    let title = require_title(&task.title)?;
    validate_stock(&task.required_stock)?;
    let status = parse_task_status(task.status.as_deref())?;
    Ok((title, status))
}

/// Ensure `order` is a permutation of `existing`.
pub(crate) fn validate_reorder(existing: &[Uuid], order: &[Uuid]) -> Result<(), MissionError> {
    let existing_set: HashSet<&Uuid> = existing.iter().collect();
    let order_set: HashSet<&Uuid> = order.iter().collect();
    if order.len() != existing.len() || order_set.len() != order.len() || order_set != existing_set {
        return Err(MissionError::Validation("order must list every task of the mission exactly once".into()));
    }
    Ok(())
}

fn value_as_text(field: &str, value: &serde_json::Value) -> Result<String, MissionError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| MissionError::Validation(format!("{field} must be a string")))
}

fn value_as_optional_uuid(field: &str, value: &serde_json::Value) -> Result<Option<Uuid>, MissionError> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(Some)
        .ok_or_else(|| MissionError::Validation(format!("{field} must be a UUID or null")))
}

/// Apply one auto-save field to a mission row.
pub(crate) fn apply_mission_field(
    mission: &mut MissionRow,
    field: MissionField,
    value: &serde_json::Value,
) -> Result<(), MissionError> {
    match field {
        MissionField::Title => mission.title = require_title(&value_as_text("title", value)?)?,
        MissionField::ProblemStatement => mission.problem_statement = value_as_text("problem_statement", value)?,
        MissionField::ResourcesRequired => {
            let resources: Vec<ResourceRef> = serde_json::from_value(value.clone())
                .map_err(|e| MissionError::Validation(format!("resources_required: {e}")))?;
            validate_resources(&resources)?;
            mission.resources_required = Json(resources);
        }
        MissionField::QaAssignee => mission.qa_assignee = value_as_optional_uuid("qa_assignee", value)?,
    }
    Ok(())
}

/// Apply one auto-save field to a task row.
pub(crate) fn apply_task_field(task: &mut TaskRow, field: TaskField, value: &serde_json::Value) -> Result<(), MissionError> {
    match field {
        TaskField::Title => task.title = require_title(&value_as_text("title", value)?)?,
        TaskField::Plan => task.plan = value_as_text("plan", value)?,
        TaskField::Observations => task.observations = value_as_text("observations", value)?,
        TaskField::AssignedTo => task.assigned_to = value_as_optional_uuid("assigned_to", value)?,
        TaskField::EstimatedDuration => {
            task.estimated_duration = if value.is_null() {
                None
            } else {
                Some(value_as_text("estimated_duration", value)?).filter(|d| !d.trim().is_empty())
            };
        }
        TaskField::RequiredTools => {
            let tools: Vec<Uuid> = serde_json::from_value(value.clone())
                .map_err(|e| MissionError::Validation(format!("required_tools: {e}")))?;
            task.required_tools = Json(tools);
        }
        TaskField::RequiredStock => {
            let stock: Vec<StockRequirement> = serde_json::from_value(value.clone())
                .map_err(|e| MissionError::Validation(format!("required_stock: {e}")))?;
            validate_stock(&stock)?;
            task.required_stock = Json(stock);
        }
        TaskField::Status => {
            task.status = parse_task_status(Some(&value_as_text("status", value)?))?.as_str().to_owned();
        }
    }
    Ok(())
}

/// Check whether the caller may move a mission to `next`.
///
/// Completing a mission is a QA sign-off: only the QA assignee or someone
/// with `Lead` may do it.
pub(crate) fn authorize_transition(
    mission: &MissionRow,
    next: MissionStatus,
    caller_id: Uuid,
    caller_role: OrgRole,
) -> Result<MissionStatus, MissionError> {
    let current = MissionStatus::parse(&mission.status)
        .ok_or_else(|| MissionError::Validation(format!("stored mission status is unknown: {}", mission.status)))?;
    if !current.can_transition_to(next) {
        return Err(MissionError::InvalidTransition { from: current.as_str(), to: next.as_str() });
    }
    if next == MissionStatus::Completed
        && mission.qa_assignee != Some(caller_id)
        && !caller_role.allows(OrgPermission::Lead)
    {
        return Err(MissionError::Forbidden("only the QA assignee or leadership can complete a mission".into()));
    }
    Ok(current)
}

// =============================================================================
// MISSIONS
// =============================================================================

/// Create a mission and its initial tasks.
///
/// # Errors
///
/// `Validation` for a blank title, bad resource or task data.
pub async fn create_mission(
    pool: &PgPool,
    org_id: Uuid,
    created_by: Uuid,
    mission: NewMission,
) -> Result<MissionWithTasks, MissionError> {
    let title = require_title(&mission.title)?;
    validate_resources(&mission.resources_required)?;
    let tasks = mission
        .tasks
        .iter()
        .map(|task| validate_task(task).map(|(title, status)| (task, title, status)))
        .collect::<Result<Vec<_>, _>>()?;

    let now = now_ms();
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, MissionRow>(&format!(
        "INSERT INTO missions (id, organization_id, title, problem_statement, resources_required, status, \
             created_by, qa_assignee, template_id, template_name, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 'planning', $6, $7, $8, $9, $10, $10) \
         RETURNING {MISSION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(&title)
    .bind(mission.problem_statement.trim())
    .bind(Json(&mission.resources_required))
    .bind(created_by)
    .bind(mission.qa_assignee)
    .bind(&mission.template_id)
    .bind(&mission.template_name)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;

    let mut task_rows = Vec::with_capacity(tasks.len());
    for (position, (task, title, status)) in tasks.into_iter().enumerate() {
        let position = i32::try_from(position).map_err(|_| MissionError::Validation("too many tasks".into()))?;
        task_rows.push(insert_task(tx.as_mut(), row.id, position, task, &title, status, now).await?);
    }
    tx.commit().await?;

    info!(%org_id, mission_id = %row.id, tasks = task_rows.len(), "mission created");
    Ok(MissionWithTasks { mission: row, tasks: task_rows })
}

async fn insert_task(
    conn: &mut PgConnection,
    mission_id: Uuid,
    position: i32,
    task: &NewTask,
    title: &str,
    status: TaskStatus,
    now: i64,
) -> Result<TaskRow, MissionError> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "INSERT INTO tasks (id, mission_id, position, title, plan, observations, assigned_to, estimated_duration, \
             required_tools, required_stock, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) \
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(mission_id)
    .bind(position)
    .bind(title)
    .bind(&task.plan)
    .bind(&task.observations)
    .bind(task.assigned_to)
    .bind(task.estimated_duration.as_deref().map(str::trim).filter(|d| !d.is_empty()))
    .bind(Json(&task.required_tools))
    .bind(Json(&task.required_stock))
    .bind(status.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// List missions, newest first, optionally by status.
///
/// # Errors
///
/// `Validation` for an unknown status filter.
pub async fn list_missions(pool: &PgPool, org_id: Uuid, status: Option<&str>) -> Result<Vec<MissionRow>, MissionError> {
    let status = match status.filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            MissionStatus::parse(raw)
                .ok_or_else(|| MissionError::Validation(format!("unknown mission status: {raw}")))?
                .as_str(),
        ),
        None => None,
    };
    let rows = sqlx::query_as::<_, MissionRow>(&format!(
        "SELECT {MISSION_COLUMNS} FROM missions \
         WHERE organization_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY created_at DESC"
    ))
    .bind(org_id)
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn load_mission(pool: &PgPool, org_id: Uuid, mission_id: Uuid) -> Result<MissionRow, MissionError> {
    sqlx::query_as::<_, MissionRow>(&format!(
        "SELECT {MISSION_COLUMNS} FROM missions WHERE id = $1 AND organization_id = $2"
    ))
    .bind(mission_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(MissionError::NotFound(mission_id))
}

/// `load_mission` under a row lock held until `conn`'s transaction ends.
async fn lock_mission(conn: &mut PgConnection, org_id: Uuid, mission_id: Uuid) -> Result<MissionRow, MissionError> {
    sqlx::query_as::<_, MissionRow>(&format!(
        "SELECT {MISSION_COLUMNS} FROM missions WHERE id = $1 AND organization_id = $2 FOR UPDATE"
    ))
    .bind(mission_id)
    .bind(org_id)
    .fetch_optional(conn)
    .await?
    .ok_or(MissionError::NotFound(mission_id))
}

async fn load_tasks(pool: &PgPool, mission_id: Uuid) -> Result<Vec<TaskRow>, MissionError> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE mission_id = $1 ORDER BY position ASC"
    ))
    .bind(mission_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch a mission with its ordered tasks.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_mission(pool: &PgPool, org_id: Uuid, mission_id: Uuid) -> Result<MissionWithTasks, MissionError> {
    let mission = load_mission(pool, org_id, mission_id).await?;
    let tasks = load_tasks(pool, mission_id).await?;
    Ok(MissionWithTasks { mission, tasks })
}

/// Write the editable columns. `status` is owned by `change_status`.
async fn save_mission(conn: &mut PgConnection, mission: &MissionRow) -> Result<(), MissionError> {
    sqlx::query(
        "UPDATE missions SET title = $3, problem_statement = $4, resources_required = $5, \
             qa_assignee = $6, template_id = $7, template_name = $8, updated_at = $9 \
         WHERE id = $1 AND organization_id = $2",
    )
    .bind(mission.id)
    .bind(mission.organization_id)
    .bind(&mission.title)
    .bind(&mission.problem_statement)
    .bind(&mission.resources_required)
    .bind(mission.qa_assignee)
    .bind(&mission.template_id)
    .bind(&mission.template_name)
    .bind(mission.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Replace a mission's editable fields.
///
/// # Errors
///
/// `NotFound` if absent, `Validation` for bad fields.
pub async fn update_mission(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    update: MissionUpdate,
) -> Result<MissionRow, MissionError> {
    validate_resources(&update.resources_required)?;
    let mut tx = pool.begin().await?;
    let mut mission = lock_mission(tx.as_mut(), org_id, mission_id).await?;
    mission.title = require_title(&update.title)?;
    mission.problem_statement = update.problem_statement.trim().to_owned();
    mission.resources_required = Json(update.resources_required);
    mission.qa_assignee = update.qa_assignee;
    mission.template_id = update.template_id;
    mission.template_name = update.template_name;
    mission.updated_at = now_ms();
    save_mission(tx.as_mut(), &mission).await?;
    tx.commit().await?;
    Ok(mission)
}

/// Auto-save one mission field.
///
/// # Errors
///
/// `Validation` for a field outside the whitelist or a badly typed value.
pub async fn patch_mission_field(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    field: &str,
    value: &serde_json::Value,
) -> Result<MissionRow, MissionError> {
    let field =
        MissionField::parse(field).ok_or_else(|| MissionError::Validation(format!("field not editable: {field}")))?;
    let mut tx = pool.begin().await?;
    let mut mission = lock_mission(tx.as_mut(), org_id, mission_id).await?;
    apply_mission_field(&mut mission, field, value)?;
    mission.updated_at = now_ms();
    save_mission(tx.as_mut(), &mission).await?;
    tx.commit().await?;
    Ok(mission)
}

/// Move a mission to a new status.
///
/// # Errors
///
/// `InvalidTransition` or `Forbidden` per `authorize_transition`.
pub async fn change_status(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    next: &str,
    caller_id: Uuid,
    caller_role: OrgRole,
) -> Result<MissionRow, MissionError> {
    let next = MissionStatus::parse(next)
        .ok_or_else(|| MissionError::Validation(format!("unknown mission status: {next}")))?;
    // The lock keeps the transition check valid until the write lands.
    let mut tx = pool.begin().await?;
    let mut mission = lock_mission(tx.as_mut(), org_id, mission_id).await?;
    let current = match authorize_transition(&mission, next, caller_id, caller_role) {
        Ok(current) => current,
        Err(e) => {
            warn!(%mission_id, from = %mission.status, to = next.as_str(), error = %e, "mission transition rejected");
            return Err(e);
        }
    };
    mission.status = next.as_str().to_owned();
    mission.updated_at = now_ms();
    sqlx::query("UPDATE missions SET status = $3, updated_at = $4 WHERE id = $1 AND organization_id = $2")
        .bind(mission_id)
        .bind(org_id)
        .bind(&mission.status)
        .bind(mission.updated_at)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    info!(%org_id, %mission_id, from = current.as_str(), to = next.as_str(), "mission status changed");
    Ok(mission)
}

/// Delete a mission and its tasks.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn delete_mission(pool: &PgPool, org_id: Uuid, mission_id: Uuid) -> Result<(), MissionError> {
    let result = sqlx::query("DELETE FROM missions WHERE id = $1 AND organization_id = $2")
        .bind(mission_id)
        .bind(org_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MissionError::NotFound(mission_id));
    }
    info!(%org_id, %mission_id, "mission deleted");
    Ok(())
}

// =============================================================================
// TASKS
// =============================================================================

/// Append a task to a mission.
///
/// # Errors
///
/// `NotFound` for an unknown mission, `Validation` for bad task data.
pub async fn add_task(pool: &PgPool, org_id: Uuid, mission_id: Uuid, task: NewTask) -> Result<TaskRow, MissionError> {
    load_mission(pool, org_id, mission_id).await?;
    let (title, status) = validate_task(&task)?;

    let mut tx = pool.begin().await?;
    // Lock the mission row so concurrent appends get distinct positions.
    sqlx::query("SELECT id FROM missions WHERE id = $1 FOR UPDATE")
        .bind(mission_id)
        .execute(tx.as_mut())
        .await?;
    let next_position: i32 = sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM tasks WHERE mission_id = $1")
        .bind(mission_id)
        .fetch_one(tx.as_mut())
        .await?;
    let row = insert_task(tx.as_mut(), mission_id, next_position, &task, &title, status, now_ms()).await?;
    tx.commit().await?;
    Ok(row)
}

/// Load a task and lock its row until `conn`'s transaction ends.
async fn lock_task(conn: &mut PgConnection, org_id: Uuid, mission_id: Uuid, task_id: Uuid) -> Result<TaskRow, MissionError> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT t.{} FROM tasks t JOIN missions m ON m.id = t.mission_id \
         WHERE t.id = $1 AND t.mission_id = $2 AND m.organization_id = $3 \
         FOR UPDATE OF t",
        TASK_COLUMNS.replace(", ", ", t.")
    ))
    .bind(task_id)
    .bind(mission_id)
    .bind(org_id)
    .fetch_optional(conn)
    .await?
    .ok_or(MissionError::TaskNotFound(task_id))
}

async fn save_task(conn: &mut PgConnection, task: &TaskRow) -> Result<(), MissionError> {
    sqlx::query(
        "UPDATE tasks SET title = $2, plan = $3, observations = $4, assigned_to = $5, estimated_duration = $6, \
             required_tools = $7, required_stock = $8, status = $9, updated_at = $10 \
         WHERE id = $1",
    )
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.plan)
    .bind(&task.observations)
    .bind(task.assigned_to)
    .bind(&task.estimated_duration)
    .bind(&task.required_tools)
    .bind(&task.required_stock)
    .bind(&task.status)
    .bind(task.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Replace a task's editable fields.
///
/// # Errors
///
/// `TaskNotFound` if absent, `Validation` for bad fields.
pub async fn update_task(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    task_id: Uuid,
    update: NewTask,
) -> Result<TaskRow, MissionError> {
    let (title, status) = validate_task(&update)?;
    let mut tx = pool.begin().await?;
    let mut task = lock_task(tx.as_mut(), org_id, mission_id, task_id).await?;
    task.title = title;
    task.plan = update.plan;
    task.observations = update.observations;
    task.assigned_to = update.assigned_to;
    task.estimated_duration = update.estimated_duration.filter(|d| !d.trim().is_empty());
    task.required_tools = Json(update.required_tools);
    task.required_stock = Json(update.required_stock);
    task.status = status.as_str().to_owned();
    task.updated_at = now_ms();
    save_task(tx.as_mut(), &task).await?;
    tx.commit().await?;
    Ok(task)
}

/// Auto-save one task field.
///
/// # Errors
///
/// `Validation` for a field outside the whitelist or a badly typed value.
pub async fn patch_task_field(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    task_id: Uuid,
    field: &str,
    value: &serde_json::Value,
) -> Result<TaskRow, MissionError> {
    let field = TaskField::parse(field).ok_or_else(|| MissionError::Validation(format!("field not editable: {field}")))?;
    let mut tx = pool.begin().await?;
    let mut task = lock_task(tx.as_mut(), org_id, mission_id, task_id).await?;
    apply_task_field(&mut task, field, value)?;
    task.updated_at = now_ms();
    save_task(tx.as_mut(), &task).await?;
    tx.commit().await?;
    Ok(task)
}

/// Delete a task and close the gap in positions.
///
/// # Errors
///
/// `TaskNotFound` if absent.
pub async fn delete_task(pool: &PgPool, org_id: Uuid, mission_id: Uuid, task_id: Uuid) -> Result<(), MissionError> {
    let mut tx = pool.begin().await?;
    // Position shifts are serialized on the mission row, as in `add_task`.
    lock_mission(tx.as_mut(), org_id, mission_id).await?;
    let task = lock_task(tx.as_mut(), org_id, mission_id, task_id).await?;
    sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(task_id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("UPDATE tasks SET position = position - 1 WHERE mission_id = $1 AND position > $2")
        .bind(mission_id)
        .bind(task.position)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Reorder a mission's tasks to match `order`.
///
/// # Errors
///
/// `Validation` unless `order` is a permutation of the mission's task ids.
pub async fn reorder_tasks(
    pool: &PgPool,
    org_id: Uuid,
    mission_id: Uuid,
    order: &[Uuid],
) -> Result<Vec<TaskRow>, MissionError> {
    let mut tx = pool.begin().await?;
    lock_mission(tx.as_mut(), org_id, mission_id).await?;
    let existing: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM tasks WHERE mission_id = $1")
        .bind(mission_id)
        .fetch_all(tx.as_mut())
        .await?;
    validate_reorder(&existing, order)?;

    let now = now_ms();
    for (position, task_id) in order.iter().enumerate() {
        let position = i32::try_from(position).map_err(|_| MissionError::Validation("too many tasks".into()))?;
        sqlx::query("UPDATE tasks SET position = $2, updated_at = $3 WHERE id = $1")
            .bind(task_id)
            .bind(position)
            .bind(now)
            .execute(tx.as_mut())
            .await?;
    }
    tx.commit().await?;
    load_tasks(pool, mission_id).await
}

#[cfg(test)]
#[path = "mission_test.rs"]
mod tests;
